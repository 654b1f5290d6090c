//! Process-local bounded LRU cache (C6) keyed by
//! `(hash(text), goal_hint, source_type, policy_fingerprint)`. On a hit the
//! caller still allocates a fresh `prune_id` and marks the result
//! `cache_hit`/`deepinfra_cached`.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use tokio::sync::Mutex;

use crate::reconstruct::Annotation;
use crate::types::{SourceType, Stats};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    text_hash: u64,
    goal_hint: String,
    source_type: SourceType,
    policy_fingerprint: u64,
}

impl CacheKey {
    pub fn new(text: &str, goal_hint: &str, source_type: SourceType, policy_fingerprint: u64) -> Self {
        CacheKey {
            text_hash: hash_one(text),
            goal_hint: goal_hint.to_string(),
            source_type,
            policy_fingerprint,
        }
    }
}

fn hash_one<T: Hash>(value: T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Fingerprints the tunables that affect pruning output, so a cache hit
/// only fires when every setting matches, not just the text and hint.
pub fn policy_fingerprint(
    backend: &str,
    max_prune_ratio: f64,
    min_keep_lines: usize,
    annotate_lines: bool,
    include_markers: bool,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    backend.hash(&mut hasher);
    max_prune_ratio.to_bits().hash(&mut hasher);
    min_keep_lines.hash(&mut hasher);
    annotate_lines.hash(&mut hasher);
    include_markers.hash(&mut hasher);
    hasher.finish()
}

#[derive(Clone)]
pub struct CachedPrune {
    pub pruned_text: String,
    pub annotations: Vec<Annotation>,
    pub stats: Stats,
}

struct Inner {
    map: HashMap<CacheKey, CachedPrune>,
    order: VecDeque<CacheKey>,
}

pub struct PruneCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl PruneCache {
    pub fn new(capacity: usize) -> Self {
        PruneCache {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CachedPrune> {
        let mut inner = self.inner.lock().await;
        let value = inner.map.get(key).cloned()?;
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.clone());
        Some(value)
    }

    pub async fn put(&self, key: CacheKey, value: CachedPrune) {
        let mut inner = self.inner.lock().await;
        if inner.map.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else if inner.map.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            }
        }
        inner.order.push_back(key.clone());
        inner.map.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str) -> CachedPrune {
        CachedPrune {
            pruned_text: text.to_string(),
            annotations: Vec::new(),
            stats: Stats::new("heuristic", 1, 1, 0),
        }
    }

    #[tokio::test]
    async fn put_then_get_hits() {
        let cache = PruneCache::new(4);
        let key = CacheKey::new("hello world", "goal", SourceType::Docs, 1);
        cache.put(key.clone(), entry("pruned")).await;
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn evicts_least_recently_used_entry_when_full() {
        let cache = PruneCache::new(2);
        let k1 = CacheKey::new("a", "goal", SourceType::Docs, 1);
        let k2 = CacheKey::new("b", "goal", SourceType::Docs, 1);
        let k3 = CacheKey::new("c", "goal", SourceType::Docs, 1);

        cache.put(k1.clone(), entry("a")).await;
        cache.put(k2.clone(), entry("b")).await;
        cache.get(&k1).await;
        cache.put(k3.clone(), entry("c")).await;

        assert!(cache.get(&k1).await.is_some());
        assert!(cache.get(&k2).await.is_none());
        assert!(cache.get(&k3).await.is_some());
    }

    #[tokio::test]
    async fn different_policy_fingerprint_is_a_miss() {
        let cache = PruneCache::new(4);
        let k1 = CacheKey::new("same text", "goal", SourceType::Docs, 1);
        let k2 = CacheKey::new("same text", "goal", SourceType::Docs, 2);
        cache.put(k1, entry("pruned")).await;
        assert!(cache.get(&k2).await.is_none());
    }
}
