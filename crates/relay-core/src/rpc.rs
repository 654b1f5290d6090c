//! JSON-RPC 2.0 frame types shared by the pruner client (C5), the pruner
//! server (C6), the gateway (C7), and the stdio bridge (C8).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const BRIDGE_OVERFLOW: i64 = -32001;
pub const GATEWAY_UNKNOWN_SERVER: i64 = -32001;
pub const GATEWAY_UPSTREAM_TIMEOUT: i64 = -32002;
pub const PRUNE_ID_NOT_FOUND: i64 = -32004;
pub const INVALID_RANGE: i64 = -32005;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        RpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        RpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

impl RpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Value) -> Self {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Wraps a tool's JSON payload the way MCP `tools/call` results are framed:
/// `{"content":[{"type":"text","text":"<json-string>"}]}`.
pub fn wrap_tool_result(payload: &Value) -> Value {
    serde_json::json!({
        "content": [
            { "type": "text", "text": payload.to_string() }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_echoes_id() {
        let resp = RpcResponse::ok(Value::from(7), serde_json::json!({"ok": true}));
        assert_eq!(resp.id, Value::from(7));
        assert!(resp.error.is_none());
    }

    #[test]
    fn error_response_preserves_id_and_code() {
        let resp = RpcResponse::err(Value::Null, PRUNE_ID_NOT_FOUND, "prune_id_not_found");
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.unwrap().code, PRUNE_ID_NOT_FOUND);
    }

    #[test]
    fn wrap_tool_result_nests_json_as_text() {
        let wrapped = wrap_tool_result(&serde_json::json!({"a": 1}));
        let text = wrapped["content"][0]["text"].as_str().unwrap();
        assert_eq!(text, r#"{"a":1}"#);
    }
}
