//! Size-bounded TTL cache
//!
//! Thread-safe key→value store with lazy time-based expiry, used by the
//! verifiers to avoid redundant remote lookups (login-name mapping, attribute
//! mapping, group membership). Each verifier owns its cache instances;
//! nothing is shared across unrelated caches.
//!
//! Entries are checked for expiry on read, never swept proactively. When the
//! entry count exceeds the configured bound, the oldest entries are evicted
//! on insert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Thread-safe TTL cache with a size bound
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    stats: CacheStats,
}

/// A cached value with its insertion time
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses (absent or expired)
    pub misses: u64,
    /// Total evictions (expired on read, or displaced by the size bound)
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache with the given TTL and entry bound.
    ///
    /// A `max_entries` of 0 means unbounded.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
            stats: CacheStats::default(),
        }
    }

    /// Get a value if present and not expired. Expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(self.ttl) => {
                drop(entry);
                self.entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a value, evicting the oldest entries if the bound is exceeded.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        self.enforce_bound();
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Current entry count, including not-yet-evicted expired entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }

    fn enforce_bound(&self) {
        if self.max_entries == 0 || self.entries.len() <= self.max_entries {
            return;
        }

        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().inserted_at))
            .collect();
        by_age.sort_by_key(|(_, inserted_at)| *inserted_at);

        let excess = by_age.len().saturating_sub(self.max_entries);
        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_miss() {
        let cache: TtlCache<String> = TtlCache::new(Duration::from_secs(60), 0);
        cache.insert("alice", "cn=alice,dc=example".to_string());

        assert_eq!(cache.get("alice"), Some("cn=alice,dc=example".to_string()));
        assert_eq!(cache.get("bob"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn lazy_expiry_on_read() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(1), 0);
        cache.insert("k", 1);

        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn size_bound_evicts_oldest() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b", 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn unbounded_when_zero() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60), 0);
        for i in 0..100 {
            cache.insert(format!("k{i}"), i);
        }
        assert_eq!(cache.len(), 100);
    }

    #[test]
    fn clear_empties() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60), 0);
        cache.insert("k", 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("k"), None);
    }
}
