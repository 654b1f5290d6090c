//! Optional JSONL frame-event log. Payloads (`params`/`result`/`error`) are
//! never recorded, only direction/kind/method/id. The writer never blocks
//! the relay: a full queue just increments `dropped`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub log_path: String,
    pub queue_max: usize,
    pub summary_on_exit: bool,
}

impl MonitoringConfig {
    pub fn from_env() -> Option<Self> {
        let enabled = std::env::var("MCP_BRIDGE_MONITORING_ENABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if !enabled {
            return None;
        }
        let log_path = std::env::var("MCP_BRIDGE_MONITORING_LOG_PATH").unwrap_or_else(|_| "mcp_bridge.jsonl".to_string());
        let queue_max = std::env::var("MCP_BRIDGE_MONITORING_QUEUE_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1024);
        let summary_on_exit = std::env::var("MCP_BRIDGE_MONITORING_SUMMARY_ON_EXIT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        Some(MonitoringConfig {
            log_path,
            queue_max,
            summary_on_exit,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::ClientToServer => "client_to_server",
            Direction::ServerToClient => "server_to_client",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Notification,
    Response,
    Error,
    NonJsonrpc,
}

impl FrameKind {
    fn as_str(self) -> &'static str {
        match self {
            FrameKind::Request => "request",
            FrameKind::Notification => "notification",
            FrameKind::Response => "response",
            FrameKind::Error => "error",
            FrameKind::NonJsonrpc => "non_jsonrpc",
        }
    }
}

#[derive(Serialize)]
struct FrameEvent {
    ts_ms: u64,
    direction: &'static str,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
}

pub fn classify(message: &Value) -> FrameKind {
    let Some(obj) = message.as_object() else {
        return FrameKind::NonJsonrpc;
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return FrameKind::NonJsonrpc;
    }
    if obj.contains_key("method") {
        if obj.contains_key("id") {
            FrameKind::Request
        } else {
            FrameKind::Notification
        }
    } else if obj.contains_key("error") {
        FrameKind::Error
    } else if obj.contains_key("result") {
        FrameKind::Response
    } else {
        FrameKind::NonJsonrpc
    }
}

pub struct MonitoringHandle {
    sender: mpsc::Sender<FrameEvent>,
    dropped: Arc<AtomicU64>,
}

impl MonitoringHandle {
    pub fn record(&self, direction: Direction, message: &Value, now_ms: u64) {
        let kind = classify(message);
        let event = FrameEvent {
            ts_ms: now_ms,
            direction: direction.as_str(),
            kind: kind.as_str(),
            method: message.get("method").and_then(Value::as_str).map(str::to_string),
            id: message.get("id").cloned(),
        };
        if self.sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Spawns the background writer task; returns a handle to record events.
pub async fn spawn(config: MonitoringConfig) -> std::io::Result<MonitoringHandle> {
    let (tx, mut rx) = mpsc::channel::<FrameEvent>(config.queue_max.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    let mut file = OpenOptions::new().create(true).append(true).open(&config.log_path).await?;

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(mut line) = serde_json::to_vec(&event) {
                line.push(b'\n');
                let _ = file.write_all(&line).await;
            }
        }
    });

    Ok(MonitoringHandle { sender: tx, dropped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_request_vs_notification() {
        assert_eq!(classify(&json!({"jsonrpc": "2.0", "id": 1, "method": "a"})), FrameKind::Request);
        assert_eq!(classify(&json!({"jsonrpc": "2.0", "method": "a"})), FrameKind::Notification);
        assert_eq!(classify(&json!({"jsonrpc": "2.0", "id": 1, "result": {}})), FrameKind::Response);
        assert_eq!(classify(&json!({"jsonrpc": "2.0", "id": 1, "error": {}})), FrameKind::Error);
        assert_eq!(classify(&json!("banner text")), FrameKind::NonJsonrpc);
    }

    #[test]
    fn disabled_by_default() {
        assert!(MonitoringConfig::from_env().is_none());
    }
}
