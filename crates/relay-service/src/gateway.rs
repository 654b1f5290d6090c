//! MCP gateway (C7): forwards JSON-RPC bodies to a configured upstream MCP
//! server and applies observation masking by size on the response.

use std::collections::HashMap;
use std::time::Duration;

use relay_core::rpc::{GATEWAY_UNKNOWN_SERVER, GATEWAY_UPSTREAM_TIMEOUT, RpcRequest, RpcResponse};
use serde_json::Value;

const MASK_THRESHOLD_CHARS: usize = 8_000;
const MASK_HEAD_CHARS: usize = 2_000;
const MASK_TAIL_CHARS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct GatewayRoute {
    pub base_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayTable {
    routes: HashMap<String, GatewayRoute>,
}

impl GatewayTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, server_name: &str, route: GatewayRoute) {
        self.routes.insert(server_name.to_string(), route);
    }

    pub fn get(&self, server_name: &str) -> Option<&GatewayRoute> {
        self.routes.get(server_name)
    }
}

pub struct McpGateway {
    http: reqwest::Client,
    routes: GatewayTable,
    upstream_timeout: Duration,
}

impl McpGateway {
    pub fn new(routes: GatewayTable, upstream_timeout: Duration) -> Self {
        McpGateway {
            http: reqwest::Client::new(),
            routes,
            upstream_timeout,
        }
    }

    pub async fn forward(&self, server_name: &str, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();

        let route = match self.routes.get(server_name) {
            Some(route) => route,
            None => {
                return RpcResponse::err(
                    id,
                    GATEWAY_UNKNOWN_SERVER,
                    format!("unknown mcp server: {server_name}"),
                );
            }
        };

        let send = self.http.post(&route.base_url).json(&request).send();
        let response = match tokio::time::timeout(self.upstream_timeout, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                return RpcResponse::err(
                    id,
                    GATEWAY_UPSTREAM_TIMEOUT,
                    format!("mcp gateway transport error: {e}"),
                );
            }
            Err(_) => {
                return RpcResponse::err(
                    id,
                    GATEWAY_UPSTREAM_TIMEOUT,
                    "mcp gateway upstream timeout".to_string(),
                );
            }
        };

        match response.json::<RpcResponse>().await {
            Ok(mut body) => {
                if let Some(result) = body.result.take() {
                    body.result = Some(mask_large_strings(result));
                }
                body
            }
            Err(e) => RpcResponse::err(
                id,
                GATEWAY_UPSTREAM_TIMEOUT,
                format!("mcp gateway response decode error: {e}"),
            ),
        }
    }
}

/// Replaces any string longer than [`MASK_THRESHOLD_CHARS`] anywhere in
/// `value` with its head/tail plus a masked-length marker. Recurses into
/// objects and arrays; non-string leaves are untouched.
fn mask_large_strings(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let char_count = s.chars().count();
            if char_count > MASK_THRESHOLD_CHARS {
                let head: String = s.chars().take(MASK_HEAD_CHARS).collect();
                let tail: String = s
                    .chars()
                    .rev()
                    .take(MASK_TAIL_CHARS)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                Value::String(format!(
                    "{head}…[KIMI_PROXY_OBSERVATION_MASKED original_chars={char_count}]…{tail}"
                ))
            } else {
                Value::String(s)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(mask_large_strings).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, mask_large_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_strings_are_preserved() {
        let value = json!({"content": [{"type": "text", "text": "hi"}]});
        assert_eq!(mask_large_strings(value.clone()), value);
    }

    #[test]
    fn long_strings_are_masked_with_head_and_tail() {
        let long = "x".repeat(10_000);
        let value = json!({"content": [{"type": "text", "text": long}]});
        let masked = mask_large_strings(value);
        let text = masked["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("KIMI_PROXY_OBSERVATION_MASKED original_chars=10000"));
        assert!(text.starts_with('x'));
        assert!(text.ends_with('x'));
    }

    #[test]
    fn recurses_into_nested_arrays() {
        let long = "y".repeat(9_000);
        let value = json!([{"a": [long]}]);
        let masked = mask_large_strings(value);
        let text = masked[0]["a"][0].as_str().unwrap();
        assert!(text.contains("KIMI_PROXY_OBSERVATION_MASKED"));
    }
}
