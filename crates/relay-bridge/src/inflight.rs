//! Tracks `id -> method` for every client→server request so overflow errors
//! and monitoring can be attributed to the right in-flight call.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::Mutex;

pub struct InFlightTracker {
    by_id: Mutex<HashMap<String, String>>,
}

fn id_key(id: &Value) -> Option<String> {
    if id.is_null() {
        None
    } else {
        Some(id.to_string())
    }
}

impl InFlightTracker {
    pub fn new() -> Self {
        InFlightTracker {
            by_id: Mutex::new(HashMap::new()),
        }
    }

    /// Records a client→server request's id/method if the message is a
    /// request (has both `id` and `method`); notifications are ignored.
    pub async fn observe_outgoing(&self, message: &Value) {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return;
        };
        let Some(id) = message.get("id") else { return };
        if let Some(key) = id_key(id) {
            self.by_id.lock().await.insert(key, method.to_string());
        }
    }

    pub async fn complete(&self, id: &Value) {
        if let Some(key) = id_key(id) {
            self.by_id.lock().await.remove(&key);
        }
    }

    /// Drains every in-flight id, returning the parsed JSON ids (used to
    /// emit one overflow error per outstanding request).
    pub async fn drain_ids(&self) -> Vec<Value> {
        let mut by_id = self.by_id.lock().await;
        by_id
            .drain()
            .filter_map(|(key, _)| serde_json::from_str(&key).ok())
            .collect()
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        InFlightTracker::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn completed_request_is_not_drained() {
        let tracker = InFlightTracker::new();
        tracker.observe_outgoing(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call"})).await;
        tracker.complete(&json!(1)).await;
        assert_eq!(tracker.drain_ids().await.len(), 0);
    }

    #[tokio::test]
    async fn notifications_without_id_are_ignored() {
        let tracker = InFlightTracker::new();
        tracker.observe_outgoing(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
        assert_eq!(tracker.drain_ids().await.len(), 0);
    }

    #[tokio::test]
    async fn drain_returns_outstanding_ids() {
        let tracker = InFlightTracker::new();
        tracker.observe_outgoing(&json!({"jsonrpc": "2.0", "id": 1, "method": "a"})).await;
        tracker.observe_outgoing(&json!({"jsonrpc": "2.0", "id": "two", "method": "b"})).await;
        tracker.complete(&json!(1)).await;
        let ids = tracker.drain_ids().await;
        assert_eq!(ids, vec![json!("two")]);
    }
}
