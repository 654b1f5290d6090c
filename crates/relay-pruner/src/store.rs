//! TTL store (C6 storage): holds the original lines behind every issued
//! `prune_id` so `recover_text` can serve them back. Single mutex, GC runs
//! on every access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct StoredPrune {
    created_at: Instant,
    lines: Vec<String>,
}

pub struct PruneStore {
    ttl: Duration,
    items: Mutex<HashMap<String, StoredPrune>>,
}

impl PruneStore {
    pub fn new(ttl: Duration) -> Self {
        PruneStore {
            ttl,
            items: Mutex::new(HashMap::new()),
        }
    }

    pub async fn put(&self, prune_id: String, lines: Vec<String>) {
        let mut items = self.items.lock().await;
        items.insert(
            prune_id,
            StoredPrune {
                created_at: Instant::now(),
                lines,
            },
        );
        gc_locked(&mut items, self.ttl);
    }

    pub async fn get(&self, prune_id: &str) -> Option<Vec<String>> {
        let mut items = self.items.lock().await;
        gc_locked(&mut items, self.ttl);
        items.get(prune_id).map(|item| item.lines.clone())
    }
}

fn gc_locked(items: &mut HashMap<String, StoredPrune>, ttl: Duration) {
    let now = Instant::now();
    items.retain(|_, item| now.duration_since(item.created_at) <= ttl);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = PruneStore::new(Duration::from_secs(60));
        store.put("prn_1".to_string(), vec!["a".to_string(), "b".to_string()]).await;
        let lines = store.get("prn_1").await;
        assert_eq!(lines, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn missing_id_returns_none() {
        let store = PruneStore::new(Duration::from_secs(60));
        assert_eq!(store.get("prn_missing").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_gc_on_access() {
        let store = PruneStore::new(Duration::from_millis(10));
        store.put("prn_1".to_string(), vec!["a".to_string()]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("prn_1").await, None);
    }
}
