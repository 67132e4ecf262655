//! Thread-safe memoization for resolution results.
//!
//! Lookups take a shared read lock; the value for a missing key is computed
//! outside any lock and inserted under the write lock. When two threads race
//! on the same key, the first insertion wins and both callers receive that
//! value, so a cache never hands out two different instances for one key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries.
    pub len: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that computed a value.
    pub misses: u64,
}

impl CacheStats {
    /// Hit ratio in `[0, 1]`, or 0 when nothing was looked up.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A get-or-compute map shared between threads.
#[derive(Debug)]
pub struct ConcurrentCache<K, V> {
    map: RwLock<HashMap<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> ConcurrentCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key`, computing and inserting it if absent.
    ///
    /// `compute` runs without holding the lock and may run more than once
    /// under contention; only the first result is kept.
    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce(&K) -> V,
    {
        if let Some(v) = self.map.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return v.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let computed = compute(&key);
        self.map.write().entry(key).or_insert(computed).clone()
    }

    /// Cached value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        self.map.read().get(key).cloned()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.map.write().clear();
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Default for ConcurrentCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_insert_wins() {
        let cache: ConcurrentCache<&str, Arc<String>> = ConcurrentCache::new();
        let a = cache.get_or_insert_with("k", |_| Arc::new("first".into()));
        let b = cache.get_or_insert_with("k", |_| Arc::new("second".into()));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, "first");

        let stats = cache.stats();
        assert_eq!((stats.len, stats.hits, stats.misses), (1, 1, 1));
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_callers_share_value() {
        let cache: Arc<ConcurrentCache<u32, Arc<u32>>> = Arc::new(ConcurrentCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get_or_insert_with(1, |_| Arc::new(i)))
            })
            .collect();
        let values: Vec<Arc<u32>> = handles.into_iter().filter_map(|h| h.join().ok()).collect();
        assert_eq!(values.len(), 8);
        let cached = cache.get(&1).unwrap_or_else(|| Arc::new(u32::MAX));
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &cached)));
    }

    #[test]
    fn test_clear() {
        let cache: ConcurrentCache<u8, u8> = ConcurrentCache::new();
        cache.get_or_insert_with(1, |k| *k);
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }
}
