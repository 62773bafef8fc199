//! In-memory response cache for planner calls.
//!
//! Keyed by a SHA-256 hash of `(model, request)`. Entries optionally expire
//! after a TTL; without one they live for the process lifetime.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

struct CacheEntry {
    value: String,
    stored_at: Instant,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Option<Duration>,
}

impl ResponseCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Deterministic cache key for a model and request text.
    pub fn cache_key(model: &str, request: &str) -> String {
        let mut hasher = Sha256::new();
        // Length prefix keeps ("a|b", "c") and ("a", "b|c") apart.
        hasher.update((model.len() as u64).to_be_bytes());
        hasher.update(model.as_bytes());
        hasher.update(request.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Cached value for `key`, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let expired = match (entries.get(key), self.ttl) {
            (None, _) => return None,
            (Some(entry), Some(ttl)) => entry.stored_at.elapsed() >= ttl,
            (Some(_), None) => false,
        };

        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn put(&self, key: String, value: String) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_separates_model_from_request() {
        assert_ne!(
            ResponseCache::cache_key("a|b", "c"),
            ResponseCache::cache_key("a", "b|c")
        );
        assert_ne!(
            ResponseCache::cache_key("ab", "c"),
            ResponseCache::cache_key("a", "bc")
        );
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let k1 = ResponseCache::cache_key("gpt-4o", "build a blog");
        let k2 = ResponseCache::cache_key("gpt-4o", "build a blog");
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);
    }

    #[test]
    fn test_cache_key_varies_by_model() {
        assert_ne!(
            ResponseCache::cache_key("gpt-4o", "goal"),
            ResponseCache::cache_key("gpt-4.1", "goal")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_never_expire_without_ttl() {
        let cache = ResponseCache::new(None);
        cache.put("k".into(), "v".into());

        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(cache.get("k").as_deref(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new(Some(Duration::from_secs(3600)));
        cache.put("k".into(), "v".into());

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(cache.get("k").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }
}
