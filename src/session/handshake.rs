//! Recognizes the `initialize` request that opens a session.

use rmcp::model::InitializeRequestParams;
use serde_json::Value;

pub const INITIALIZE_METHOD: &str = "initialize";

/// Returns true only for a well-formed JSON-RPC 2.0 `initialize` request.
///
/// The envelope must carry `jsonrpc: "2.0"`, a string or integer `id`, and
/// params that parse as MCP initialize parameters. Anything else, including
/// garbage, is simply "not initialize".
pub fn is_initialize_request(body: &Value) -> bool {
    let Some(obj) = body.as_object() else {
        return false;
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return false;
    }
    if obj.get("method").and_then(Value::as_str) != Some(INITIALIZE_METHOD) {
        return false;
    }
    match obj.get("id") {
        Some(Value::String(_)) => {}
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {}
        _ => return false,
    }
    match obj.get("params") {
        Some(params @ Value::Object(_)) => {
            serde_json::from_value::<InitializeRequestParams>(params.clone()).is_ok()
        }
        _ => false,
    }
}
