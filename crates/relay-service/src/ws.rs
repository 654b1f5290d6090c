//! WebSocket broadcast hub (C11): fans metric/session/error events out to
//! connected dashboard clients. Each client gets a bounded send queue; a
//! client whose queue fills is disconnected rather than allowed to stall
//! the others (no head-of-line blocking).

use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

const CLIENT_QUEUE_CAPACITY: usize = 256;

struct Client {
    id: String,
    sender: mpsc::Sender<Value>,
}

#[derive(Default)]
pub struct WsHub {
    clients: RwLock<Vec<Client>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new client and returns `(client_id, receiver)`; the
    /// caller is expected to immediately forward a `hello` frame before any
    /// broadcast traffic, per the handshake-then-forward convention.
    pub fn connect(&self) -> (String, mpsc::Receiver<Value>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.clients.write().expect("ws hub lock poisoned").push(Client {
            id: id.clone(),
            sender: tx,
        });
        (id, rx)
    }

    pub fn disconnect(&self, client_id: &str) {
        self.clients
            .write()
            .expect("ws hub lock poisoned")
            .retain(|c| c.id != client_id);
    }

    /// Enqueues `event` (which must carry a `type` field) on every
    /// connected client's queue, stamping a monotonic-ish unix-millis
    /// timestamp. Clients whose queue is full are dropped.
    pub fn broadcast(&self, mut event: Value, now_ms: u64) {
        if let Value::Object(map) = &mut event {
            map.insert("ts".to_string(), json!(now_ms));
        }

        let mut stale = Vec::new();
        {
            let clients = self.clients.read().expect("ws hub lock poisoned");
            for client in clients.iter() {
                if client.sender.try_send(event.clone()).is_err() {
                    stale.push(client.id.clone());
                }
            }
        }
        if !stale.is_empty() {
            let mut clients = self.clients.write().expect("ws hub lock poisoned");
            clients.retain(|c| !stale.contains(&c.id));
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().expect("ws hub lock poisoned").len()
    }
}

pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn hello_frame(client_id: &str) -> Value {
    json!({ "type": "hello", "client_id": client_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connected_client_receives_broadcast() {
        let hub = WsHub::new();
        let (_, mut rx) = hub.connect();
        hub.broadcast(json!({"type": "metric_created", "id": "m1"}), 123);
        let event = rx.recv().await.unwrap();
        assert_eq!(event["type"], "metric_created");
        assert_eq!(event["ts"], 123);
    }

    #[tokio::test]
    async fn disconnected_client_is_removed() {
        let hub = WsHub::new();
        let (id, _rx) = hub.connect();
        assert_eq!(hub.client_count(), 1);
        hub.disconnect(&id);
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn slow_client_is_dropped_without_blocking_broadcast() {
        let hub = WsHub::new();
        let (_, rx) = hub.connect();
        // Never drained: fill the bounded queue then push one more.
        for i in 0..(CLIENT_QUEUE_CAPACITY + 1) {
            hub.broadcast(json!({"type": "metric_updated", "n": i}), i as u64);
        }
        assert_eq!(hub.client_count(), 0);
        drop(rx);
    }
}
