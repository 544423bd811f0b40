use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A thread-safe TTL cache backed by `DashMap`.
///
/// Entries expire `ttl` after insertion and are evicted lazily on access.
/// A cache built with [`TtlCache::unbounded`] never expires anything.
#[derive(Clone)]
pub struct TtlCache<K, V> {
    inner: Arc<DashMap<K, (V, Instant)>>,
    ttl: Option<Duration>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// A cache whose entries live until removed.
    pub fn unbounded() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl: None,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_live(&self, inserted: Instant) -> bool {
        self.ttl.map_or(true, |ttl| inserted.elapsed() < ttl)
    }

    /// Get a cached value if it exists and hasn't expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.inner.get(key)?;
        let (val, inserted) = entry.value();
        if self.is_live(*inserted) {
            return Some(val.clone());
        }
        // the read guard must go before the shard is locked for removal
        drop(entry);
        self.inner.remove(key);
        None
    }

    /// Insert or replace a value, restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(key, (value, Instant::now()));
    }

    /// Return the cached value for `key`, computing and inserting it with
    /// `init` on a miss. A failing `init` leaves the cache untouched.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        init: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = init()?;
        self.insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|(_, (v, _))| v)
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Number of entries, expired ones included until they are evicted.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove all expired entries.
    pub fn evict_expired(&self) {
        if let Some(ttl) = self.ttl {
            self.inner.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
        }
    }
}
