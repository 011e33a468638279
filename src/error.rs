//! Error types for the MCP gateway.
//!
//! Routing and bootstrap failures ([`GatewayError`]) are answered directly by
//! the router with a JSON-RPC shaped error body and an HTTP status. They never
//! travel through a session's own protocol error channel, which carries
//! [`ToolError`]s and other JSON-RPC errors for established sessions.

use crate::session::{Reply, SessionId, Verb};
use hyper::http::StatusCode;
use rmcp::model::ErrorCode;
use rmcp::ErrorData as McpError;
use serde_json::{json, Value};
use thiserror::Error;

/// JSON-RPC error code used for routing rejections.
pub const ROUTING_ERROR_CODE: i32 = -32000;
/// JSON-RPC error code for requests reaching an already closed session.
pub const SESSION_CLOSED_CODE: i32 = -32001;
/// JSON-RPC error code for unknown resource URIs.
pub const RESOURCE_NOT_FOUND_CODE: i32 = -32002;

const NO_VALID_SESSION: &str = "Bad Request: No valid session ID provided";
const INVALID_OR_MISSING_SESSION: &str = "Invalid or missing session ID";

/// Coarse classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client-correctable; answered with 400.
    Routing,
    /// Session construction failed; answered with 500.
    Initialization,
    /// Should never happen; answered with 500 and logged as a defect.
    InternalInvariant,
}

/// Errors decided by the router or the session bootstrap.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unknown session: {id}")]
    UnknownSession { id: String, verb: Verb },

    #[error("no valid session id and body is not an initialize request")]
    NoValidSession,

    #[error("{verb} requires a session id")]
    MissingSessionId { verb: Verb },

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("Session Initialization Failed: {0}")]
    InitializationFailed(String),

    #[error("invariant violated: {0}")]
    Registry(#[from] RegistryError),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::UnknownSession { .. }
            | GatewayError::NoValidSession
            | GatewayError::MissingSessionId { .. }
            | GatewayError::MalformedBody(_) => ErrorKind::Routing,
            GatewayError::InitializationFailed(_) => ErrorKind::Initialization,
            GatewayError::Registry(_) => ErrorKind::InternalInvariant,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Routing => StatusCode::BAD_REQUEST,
            ErrorKind::Initialization | ErrorKind::InternalInvariant => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// JSON-RPC `(code, message)` pair shown to the client.
    fn wire_error(&self) -> (i32, String) {
        match self {
            GatewayError::UnknownSession {
                verb: Verb::Submit, ..
            }
            | GatewayError::NoValidSession => (ROUTING_ERROR_CODE, NO_VALID_SESSION.to_string()),
            GatewayError::UnknownSession { .. } | GatewayError::MissingSessionId { .. } => {
                (ROUTING_ERROR_CODE, INVALID_OR_MISSING_SESSION.to_string())
            }
            GatewayError::MalformedBody(detail) => (
                ErrorCode::PARSE_ERROR.0,
                format!("Parse error: {detail}"),
            ),
            GatewayError::InitializationFailed(_) => (
                ErrorCode::INTERNAL_ERROR.0,
                "Session Initialization Failed".to_string(),
            ),
            GatewayError::Registry(_) => (
                ErrorCode::INTERNAL_ERROR.0,
                "Internal server error".to_string(),
            ),
        }
    }

    /// Structured body sent back to the client.
    pub fn to_body(&self) -> Value {
        let (code, message) = self.wire_error();
        json!({
            "jsonrpc": "2.0",
            "error": { "code": code, "message": message },
            "id": Value::Null,
        })
    }

    pub fn into_reply(self) -> Reply {
        Reply::json(self.status(), self.to_body())
    }
}

/// Registry mutations that would break the one-entry-per-session invariant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session already registered: {0}")]
    DuplicateSession(SessionId),
}

/// Failure to construct a session transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport construction failed: {0}")]
    Construction(String),
}

/// Failure to install a session's capability set.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("capability installation failed: {0}")]
    Failed(String),
}

/// Capability call errors, reported through the session's JSON-RPC channel.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Capabilities not installed for this session")]
    NotInstalled,
}

impl ToolError {
    /// Convert to the JSON-RPC error object carried in a protocol response.
    pub fn to_error_data(&self) -> McpError {
        match self {
            ToolError::UnknownTool(_) | ToolError::InvalidArguments { .. } => {
                McpError::invalid_params(self.to_string(), None)
            }
            ToolError::ResourceNotFound(uri) => McpError::new(
                ErrorCode(RESOURCE_NOT_FOUND_CODE),
                self.to_string(),
                Some(json!({ "uri": uri })),
            ),
            ToolError::NotInstalled => McpError::internal_error(self.to_string(), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_rejections_use_routing_code() {
        let body = GatewayError::NoValidSession.to_body();
        assert_eq!(body["error"]["code"], ROUTING_ERROR_CODE);
        assert_eq!(body["error"]["message"], NO_VALID_SESSION);
        assert!(body["id"].is_null());

        let err = GatewayError::UnknownSession {
            id: "nope".to_string(),
            verb: Verb::Submit,
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_body()["error"]["message"], NO_VALID_SESSION);
    }

    #[test]
    fn listen_rejections_mention_session_id() {
        let err = GatewayError::MissingSessionId { verb: Verb::Listen };
        assert_eq!(err.kind(), ErrorKind::Routing);
        assert_eq!(
            err.to_body()["error"]["message"],
            INVALID_OR_MISSING_SESSION
        );
    }

    #[test]
    fn invariant_violations_are_500() {
        let err = GatewayError::from(RegistryError::DuplicateSession(SessionId::from("x")));
        assert_eq!(err.kind(), ErrorKind::InternalInvariant);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_body()["error"]["code"], ErrorCode::INTERNAL_ERROR.0);
    }

    #[test]
    fn resource_not_found_carries_uri() {
        let data = ToolError::ResourceNotFound("greeting://".to_string()).to_error_data();
        assert_eq!(data.code.0, RESOURCE_NOT_FOUND_CODE);
        assert_eq!(data.data, Some(json!({ "uri": "greeting://" })));
    }
}
