//! Read-through TTL caches for value rows and tuple queries.
//!
//! Two independent maps: decoded objects by key (default TTL 300 s) and
//! tuple-query results by pattern (default TTL 10 s). A TTL of zero turns a
//! map off. Entries are only ever hints; the DHT stays authoritative.
//!
//! Hit and miss counters are emitted with every lookup at debug level.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use ad3_core::{Entity, IndexTuple, Key, TuplePattern};
use tokio::time::Instant;

/// TTLs for the two cache maps.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub object_ttl: Duration,
    pub query_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            object_ttl: Duration::from_secs(300),
            query_ttl: Duration::from_secs(10),
        }
    }
}

impl CacheConfig {
    /// Both maps off. Every lookup goes to the DHT.
    pub fn disabled() -> Self {
        Self {
            object_ttl: Duration::ZERO,
            query_ttl: Duration::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A single TTL map. Not synchronized; [`CacheLayer`] wraps it in a mutex.
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
    stats: CacheStats,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Value for `key` if present and not yet expired. Expired entries are
    /// dropped on access.
    pub fn get(&mut self, key: &K) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        };
        match hit {
            Some(_) => self.stats.hits += 1,
            None => self.stats.misses += 1,
        }
        tracing::debug!(
            cache = self.name,
            hit = hit.is_some(),
            cache_hits = self.stats.hits,
            cache_misses = self.stats.misses,
            "cache lookup"
        );
        hit
    }

    pub fn put(&mut self, key: K, value: V) {
        if !self.is_enabled() {
            return;
        }
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, Entry { value, expires_at });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

/// The object and query maps behind short-held locks.
pub struct CacheLayer {
    objects: Mutex<TtlCache<Key, Entity>>,
    queries: Mutex<TtlCache<TuplePattern, Vec<IndexTuple>>>,
}

impl CacheLayer {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            objects: Mutex::new(TtlCache::new("objects", config.object_ttl)),
            queries: Mutex::new(TtlCache::new("queries", config.query_ttl)),
        }
    }

    pub fn get_object(&self, key: &Key) -> Option<Entity> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
    }

    pub fn put_object(&self, key: Key, entity: Entity) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, entity);
    }

    pub fn get_query(&self, pattern: &TuplePattern) -> Option<Vec<IndexTuple>> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(pattern)
    }

    pub fn put_query(&self, pattern: TuplePattern, tuples: Vec<IndexTuple>) {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(pattern, tuples);
    }

    /// Drop every cached query result after a local tuple write.
    pub fn invalidate_queries(&self) {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn object_stats(&self) -> CacheStats {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).stats()
    }

    pub fn query_stats(&self) -> CacheStats {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).stats()
    }
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
