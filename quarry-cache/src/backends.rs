use dashmap::DashMap;
use std::sync::Arc;

use crate::store::{CacheStore, InMemoryStore};

/// Cache stores by domain name.
///
/// A domain that was never registered gets its own [`InMemoryStore`] on first
/// use, and keeps it: every caller asking for the same domain shares one
/// store.
#[derive(Clone, Default)]
pub struct CacheBackends {
    stores: Arc<DashMap<String, Arc<dyn CacheStore>>>,
}

impl CacheBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the store used for `domain`.
    pub fn register(&self, domain: &str, store: impl CacheStore) {
        self.stores.insert(domain.to_string(), Arc::new(store));
    }

    pub fn register_shared(&self, domain: &str, store: Arc<dyn CacheStore>) {
        self.stores.insert(domain.to_string(), store);
    }

    /// The store for `domain`, created on first access.
    pub fn get(&self, domain: &str) -> Arc<dyn CacheStore> {
        self.stores
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(InMemoryStore::new()))
            .value()
            .clone()
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.stores.contains_key(domain)
    }
}
