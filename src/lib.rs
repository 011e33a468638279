//! Session-multiplexing MCP gateway
//!
//! This library serves many independent Model Context Protocol sessions over
//! one streamable HTTP endpoint. Each session is created by an `initialize`
//! request, identified afterwards by the `mcp-session-id` header, and removed
//! from the registry exactly once when it closes.
//!
//! # Architecture
//!
//! - **[`http::GatewayService`]**: tower service mapping POST/GET/DELETE to
//!   submit/listen/terminate exchanges and encoding replies as JSON or SSE.
//!
//! - **[`session::Router`]**: resolves each exchange to a live transport,
//!   bootstraps a new session for a valid handshake, or rejects it.
//!
//! - **[`session::SessionRegistry`]**: concurrent map from session id to
//!   transport. Never locked across an await.
//!
//! - **[`server::McpTransport`]**: per-session JSON-RPC endpoint with its own
//!   capability set, listen stream and idle watchdog.
//!
//! # Capabilities
//!
//! - `add` tool: Add two numbers
//! - `greeting://{name}` resource template: Dynamic greeting generator

pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod session;

pub use config::GatewayConfig;
pub use error::{GatewayError, ToolError};
pub use http::{GatewayService, OriginCheckService};
pub use server::{DefaultCapabilities, McpTransport, McpTransportFactory};
pub use session::{Router, SessionId, SessionRegistry};
