//! LRU map whose entries expire after a fixed time-to-live.
//!
//! Used by the memory engine for statistics and neighbour records so that
//! data from nodes that went silent disappears on its own.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Not synchronized; callers hold it behind their own lock.
pub struct TtlCache<V> {
    entries: LruCache<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    /// * `capacity` - Maximum number of keys, least recently used evicted first
    /// * `ttl` - Lifetime of an entry after its last insert
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    /// Live value for `key`; an expired entry is dropped on the way.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(key);
        }
        None
    }

    pub fn insert(&mut self, key: &str, value: V) {
        self.entries.put(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.pop(key).map(|entry| entry.value)
    }

    /// All live entries, ordered by key.
    pub fn values(&mut self) -> Vec<V> {
        self.prune_expired();
        let mut live: Vec<(&String, &CacheEntry<V>)> = self.entries.iter().collect();
        live.sort_by(|a, b| a.0.cmp(b.0));
        live.into_iter().map(|(_, entry)| entry.value.clone()).collect()
    }

    pub fn prune_expired(&mut self) {
        let now = Instant::now();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.inserted_at) >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired_keys {
            self.entries.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = TtlCache::new(10, Duration::from_secs(60));
        cache.insert("n1", 3u32);
        assert_eq!(cache.get("n1"), Some(3));
        assert_eq!(cache.get("n2"), None);
    }

    #[test]
    fn test_insert_replaces_value() {
        let mut cache = TtlCache::new(10, Duration::from_secs(60));
        cache.insert("n1", 3u32);
        cache.insert("n1", 5u32);
        assert_eq!(cache.get("n1"), Some(5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entries_expire() {
        let mut cache = TtlCache::new(10, Duration::from_millis(50));
        cache.insert("n1", 1u32);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("n1"), None);
        assert!(cache.is_empty(), "Expired entry should be dropped on read");
    }

    #[test]
    fn test_values_skip_expired_and_sort() {
        let mut cache = TtlCache::new(10, Duration::from_millis(50));
        cache.insert("old", 0u32);
        std::thread::sleep(Duration::from_millis(80));
        cache.insert("b", 2u32);
        cache.insert("a", 1u32);
        assert_eq!(cache.values(), vec![1, 2]);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("n1", 1u32);
        cache.insert("n2", 2u32);
        cache.insert("n3", 3u32);
        assert_eq!(cache.get("n1"), None, "n1 should have been evicted");
        assert_eq!(cache.get("n2"), Some(2));
        assert_eq!(cache.get("n3"), Some(3));
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let mut cache = TtlCache::new(0, Duration::from_secs(60));
        cache.insert("n1", 1u32);
        assert_eq!(cache.get("n1"), Some(1));
    }
}
