use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Boxed future returned by [`CacheStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pluggable cache backend.
///
/// Implement this to put Redis, Memcached, etc. behind the record cache.
/// A `ttl` of [`Duration::ZERO`] means the entry never expires.
pub trait CacheStore: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Bytes>>;

    /// Fetch several keys at once. The returned map only holds hits.
    fn get_many<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, HashMap<String, Bytes>> {
        Box::pin(async move {
            let mut hits = HashMap::new();
            for key in keys {
                if let Some(value) = self.get(key).await {
                    hits.insert(key.clone(), value);
                }
            }
            hits
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StoreFuture<'a, ()>;

    fn set_many<'a>(&'a self, entries: Vec<(String, Bytes)>, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            for (key, value) in entries {
                self.set(&key, value, ttl).await;
            }
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

    fn remove_many<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            for key in keys {
                self.remove(key).await;
            }
        })
    }

    fn remove_by_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, ()>;

    fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Default in-memory store backed by `DashMap`.
///
/// Each entry keeps `(value, inserted_at, ttl)` and is evicted lazily on access.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<DashMap<String, (Bytes, Instant, Duration)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        let entry = self.inner.get(key)?;
        let (val, inserted, ttl) = entry.value();
        if ttl.is_zero() || inserted.elapsed() < *ttl {
            return Some(val.clone());
        }
        drop(entry);
        self.inner.remove(key);
        None
    }
}

impl CacheStore for InMemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Bytes>> {
        Box::pin(async move { self.lookup(key) })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.inner.insert(key.to_string(), (value, Instant::now(), ttl));
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.inner.remove(key);
        })
    }

    fn remove_by_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.inner.retain(|k, _| !k.starts_with(prefix));
        })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.inner.clear();
        })
    }
}
