//! Server→client `roots/list` shim for `shrimp-task-manager`: some MCP
//! servers call `roots/list` from server to client to discover the
//! workspace; a plain stdio pipe can't answer that bidirectionally, so the
//! bridge answers on the child's behalf.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use url::Url;

pub fn workspace_root() -> PathBuf {
    let env_root = std::env::var("MCP_WORKSPACE_ROOT")
        .ok()
        .or_else(|| std::env::var("WORKSPACE_PATH").ok());
    match env_root {
        Some(root) => {
            let expanded = shellexpand_home(&root);
            std::fs::canonicalize(&expanded).unwrap_or_else(|_| PathBuf::from(expanded))
        }
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

fn path_to_file_uri(path: &Path) -> String {
    Url::from_directory_path(path)
        .or_else(|_| Url::from_file_path(path))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file://{}", path.display()))
}

pub fn is_roots_list_request(message: &Value) -> bool {
    message.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
        && message.get("method").and_then(Value::as_str) == Some("roots/list")
        && message.get("id").is_some()
}

pub fn build_roots_list_response(req_id: &Value, root: &Path) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": req_id,
        "result": {
            "roots": [
                { "uri": path_to_file_uri(root), "name": "workspace" }
            ]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_roots_list_request() {
        let msg = json!({"jsonrpc": "2.0", "id": 7, "method": "roots/list"});
        assert!(is_roots_list_request(&msg));
    }

    #[test]
    fn ignores_roots_list_notification_without_id() {
        let msg = json!({"jsonrpc": "2.0", "method": "roots/list"});
        assert!(!is_roots_list_request(&msg));
    }

    #[test]
    fn builds_response_with_file_uri_root() {
        let root = std::env::current_dir().unwrap();
        let response = build_roots_list_response(&json!(3), &root);
        assert_eq!(response["id"], 3);
        let uri = response["result"]["roots"][0]["uri"].as_str().unwrap();
        assert!(uri.starts_with("file://"));
    }
}
