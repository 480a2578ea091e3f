//! In-process TTL cache backed by DashMap for sharded concurrent access.
//! Entries are stamped with an injected clock so expiry is testable without sleeps.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use optimizer_core::Clock;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// A cache hit together with its age.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<V> {
    pub value: V,
    pub age: Duration,
}

/// Concurrent TTL cache. Locking is per shard, so readers and writers of
/// unrelated keys do not contend.
pub struct LocalCache<K, V> {
    store: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl<K, V> LocalCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: DashMap::new(),
            ttl,
            max_entries,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a value if it is still within the TTL.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_within(key, self.ttl).map(|hit| hit.value)
    }

    /// Get a value no older than `max_age`, which may exceed the TTL. Used to
    /// serve stale data while the backing store is unavailable.
    pub fn get_within(&self, key: &K, max_age: Duration) -> Option<CachedValue<V>> {
        let entry = self.store.get(key)?;
        let age = self.clock.now() - entry.inserted_at;
        if age > max_age {
            return None;
        }
        Some(CachedValue {
            value: entry.value.clone(),
            age,
        })
    }

    /// Insert or update a value.
    pub fn put(&self, key: K, value: V) {
        // Simple eviction: if over capacity, skip insert (background cleanup handles this)
        if self.store.len() >= self.max_entries && !self.store.contains_key(&key) {
            metrics::counter!("cache.insert_skipped").increment(1);
            return;
        }
        self.store.insert(
            key,
            CacheEntry {
                value,
                inserted_at: self.clock.now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.store.remove(key);
    }

    /// Remove entries older than `max_age`. Call this periodically from a background task.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;
        self.store.retain(|_, entry| {
            let keep = now - entry.inserted_at <= max_age;
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            debug!(evicted = evicted, "Local cache eviction complete");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
