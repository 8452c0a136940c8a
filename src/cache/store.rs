//! Cache storage backends.

use lru::LruCache;
use serde_json::Value as JsonValue;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Key/value store behind the query cache.
///
/// Values are JSON so any serialisable query result can be stored.
pub trait CacheStore: Send + Sync {
    /// Live value for `key`, if any.
    fn get(&self, key: &str) -> Option<JsonValue>;

    fn put(&self, key: &str, value: JsonValue, ttl: Duration);

    fn forget(&self, key: &str) -> bool;

    /// Remove every key starting with `prefix`, returning how many went.
    fn forget_prefix(&self, prefix: &str) -> usize;

    fn clear(&self);
}

struct Entry {
    /// `None` for a TTL too large to represent; such entries never expire.
    expires_at: Option<Instant>,
    value: JsonValue,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process LRU store with per-entry expiry.
pub struct LruCacheStore {
    entries: Mutex<LruCache<String, Entry>>,
}

impl LruCacheStore {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl CacheStore for LruCacheStore {
    fn get(&self, key: &str) -> Option<JsonValue> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn put(&self, key: &str, value: JsonValue, ttl: Duration) {
        self.lock().put(
            key.to_string(),
            Entry {
                expires_at: Instant::now().checked_add(ttl),
                value,
            },
        );
    }

    fn forget(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    fn forget_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let keys: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entries_expire() {
        let store = LruCacheStore::new(10);
        store.put("a", json!(1), Duration::from_secs(60));
        store.put("b", json!(2), Duration::ZERO);

        assert_eq!(store.get("a"), Some(json!(1)));
        assert_eq!(store.get("b"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unbounded_ttl_never_expires() {
        let store = LruCacheStore::new(10);
        store.put("forever", json!("kept"), Duration::MAX);
        assert_eq!(store.get("forever"), Some(json!("kept")));
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let store = LruCacheStore::new(2);
        let ttl = Duration::from_secs(60);
        store.put("a", json!("a"), ttl);
        store.put("b", json!("b"), ttl);
        store.get("a");
        store.put("c", json!("c"), ttl);

        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn test_forget_prefix_only_touches_matching_keys() {
        let store = LruCacheStore::new(10);
        let ttl = Duration::from_secs(60);
        store.put("sapb1:Items:abc", json!(1), ttl);
        store.put("sapb1:Items:find:'A1'", json!(2), ttl);
        store.put("sapb1:Orders:def", json!(3), ttl);

        assert_eq!(store.forget_prefix("sapb1:Items:"), 2);
        assert!(store.get("sapb1:Orders:def").is_some());
        assert!(store.forget("sapb1:Orders:def"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let store = LruCacheStore::new(0);
        store.put("a", json!(1), Duration::from_secs(60));
        assert_eq!(store.len(), 1);
    }
}
