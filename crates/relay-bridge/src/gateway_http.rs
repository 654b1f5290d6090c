//! gateway-http mode: one JSON-RPC object per stdin line, forwarded via HTTP
//! POST to the MCP gateway, response object written back on stdout.

use reqwest::Client;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use relay_core::rpc::{INTERNAL_ERROR, PARSE_ERROR, RpcResponse};

const GATEWAY_TIMEOUT_SECS: u64 = 60;

fn gateway_url(server_name: &str) -> String {
    let base = std::env::var("MCP_GATEWAY_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
    format!("{}/api/mcp-gateway/{server_name}/rpc", base.trim_end_matches('/'))
}

pub async fn run_gateway_http(server_name: &str) -> i32 {
    let url = gateway_url(server_name);
    let client = match Client::builder().timeout(std::time::Duration::from_secs(GATEWAY_TIMEOUT_SECS)).build() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to build gateway http client");
            return 1;
        }
    };

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return 0,
            Err(e) => {
                warn!(error = %e, "stdin read error");
                return 0;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request_value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                write_response(&mut stdout, &RpcResponse::err(Value::Null, PARSE_ERROR, "Parse error")).await;
                continue;
            }
        };
        let id = request_value.get("id").cloned().unwrap_or(Value::Null);

        match client.post(&url).json(&request_value).send().await {
            Ok(response) => match response.json::<Value>().await {
                Ok(body) => write_raw(&mut stdout, &body).await,
                Err(e) => write_response(&mut stdout, &RpcResponse::err(id, INTERNAL_ERROR, e.to_string())).await,
            },
            Err(e) => write_response(&mut stdout, &RpcResponse::err(id, INTERNAL_ERROR, e.to_string())).await,
        }
    }
}

async fn write_response(stdout: &mut (impl tokio::io::AsyncWrite + Unpin), response: &RpcResponse) {
    if let Ok(value) = serde_json::to_value(response) {
        write_raw(stdout, &value).await;
    }
}

async fn write_raw(stdout: &mut (impl tokio::io::AsyncWrite + Unpin), value: &Value) {
    let mut line = value.to_string();
    line.push('\n');
    let _ = stdout.write_all(line.as_bytes()).await;
    let _ = stdout.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_defaults_to_localhost_8000() {
        assert!(gateway_url("json-query").starts_with("http://localhost:8000/api/mcp-gateway/json-query/rpc"));
    }
}
