//! Bounded in-memory caches.
//!
//! All caches in the engine are capacity-bounded and time-limited: the
//! normalized stream-id cache, the per-indexer capability cache, and the
//! sync-queue debounce cache are all instances of [`TtlCache`]. Writers are
//! single-writer per key; readers see either the previous value or the new
//! one. [`KeyedLocks`] provides the ensure-once guard so concurrent lookups
//! for the same key share one upstream fetch.

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// An LRU cache where entries also expire after a fixed lifetime.
pub struct TtlCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, Entry<V>>>,
    lifetime: Duration,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, lifetime: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            lifetime,
        }
    }

    /// Returns a clone of the cached value, or `None` if absent or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.lifetime => {
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.put(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Whether a fresh entry exists without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .peek(key)
            .is_some_and(|entry| entry.stored_at.elapsed() < self.lifetime)
    }

    pub fn remove(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pop(key);
    }
}

/// Per-key async mutexes for ensure-once cache population.
///
/// The lock map is bounded in practice by the key space (composite indexer
/// ids), so entries are kept for the process lifetime.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, creating it on first use.
    pub async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_inserted_value() {
        let cache: TtlCache<String, u32> = TtlCache::new(4, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache: TtlCache<String, u32> = TtlCache::new(4, Duration::ZERO);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(!cache.contains(&"a".to_string()));
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache: TtlCache<u32, u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.insert(1, 1);
        cache.insert(2, 2);
        cache.insert(3, 3);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(2));
        assert_eq!(cache.get(&3), Some(3));
    }

    #[test]
    fn test_contains_does_not_promote() {
        let cache: TtlCache<u32, u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.insert(1, 1);
        cache.insert(2, 2);
        assert!(cache.contains(&1));
        cache.insert(3, 3);
        // 1 was only peeked, so it is still the eviction victim.
        assert_eq!(cache.get(&1), None);
    }

    #[tokio::test]
    async fn test_keyed_locks_serialize_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("key").await;
                let mut c = counter.lock().unwrap();
                *c += 1;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 8);
    }
}
