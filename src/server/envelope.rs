//! JSON-RPC 2.0 envelope handling for a single session.

use rmcp::ErrorData as McpError;
use serde_json::{json, Value};

/// One inbound JSON-RPC message, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// A client's answer to a server-initiated request.
    Response { id: Value },
}

/// Classify a decoded body. Batches and non-objects are invalid requests.
pub fn classify(body: &Value) -> Result<Message, McpError> {
    let obj = body
        .as_object()
        .ok_or_else(|| McpError::invalid_request("Expected a single JSON-RPC object", None))?;

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(McpError::invalid_request(
            "Missing or unsupported jsonrpc version",
            None,
        ));
    }

    let params = obj.get("params").cloned();
    match (obj.get("method"), obj.get("id")) {
        (Some(Value::String(method)), Some(id)) if is_valid_id(id) => Ok(Message::Request {
            id: id.clone(),
            method: method.clone(),
            params,
        }),
        (Some(Value::String(method)), None) => Ok(Message::Notification {
            method: method.clone(),
            params,
        }),
        (None, Some(id)) if obj.contains_key("result") || obj.contains_key("error") => {
            Ok(Message::Response { id: id.clone() })
        }
        _ => Err(McpError::invalid_request("Malformed JSON-RPC message", None)),
    }
}

fn is_valid_id(id: &Value) -> bool {
    matches!(id, Value::String(_)) || id.as_i64().is_some() || id.as_u64().is_some()
}

pub fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub fn failure(id: Value, error: &McpError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::ErrorCode;

    #[test]
    fn classifies_requests_and_notifications() {
        let req = classify(&json!({"jsonrpc": "2.0", "id": 3, "method": "ping"})).unwrap();
        assert_eq!(
            req,
            Message::Request {
                id: json!(3),
                method: "ping".to_string(),
                params: None
            }
        );

        let note = classify(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(matches!(note, Message::Notification { .. }));

        let resp = classify(&json!({"jsonrpc": "2.0", "id": "s-1", "result": {}})).unwrap();
        assert_eq!(resp, Message::Response { id: json!("s-1") });
    }

    #[test]
    fn rejects_batches_and_garbage() {
        for body in [
            json!([{"jsonrpc": "2.0", "id": 1, "method": "ping"}]),
            json!("ping"),
            json!({"id": 1, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": {"x": 1}, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 1}),
        ] {
            let err = classify(&body).unwrap_err();
            assert_eq!(err.code, ErrorCode::INVALID_REQUEST, "{body}");
        }
    }

    #[test]
    fn failure_embeds_error_data() {
        let err = McpError::invalid_params("bad", None);
        let value = failure(json!(9), &err);
        assert_eq!(value["id"], 9);
        assert_eq!(value["error"]["code"], ErrorCode::INVALID_PARAMS.0);
        assert_eq!(value["error"]["message"], "bad");
    }
}
