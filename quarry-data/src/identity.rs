use dashmap::DashMap;

use crate::entity::EntityRef;
use crate::value::Id;

/// One live entity per `(type, primary key)`.
///
/// Entries stay until evicted or cleared; there is no expiry.
#[derive(Default)]
pub struct IdentityMap {
    objects: DashMap<String, EntityRef>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_name: &str, id: &Id) -> Option<EntityRef> {
        self.objects
            .get(&id.cache_key(type_name))
            .map(|e| e.value().clone())
    }

    /// Register `entity` unless the identity is already taken, and return the
    /// entity that holds it afterwards.
    pub fn put(&self, type_name: &str, id: &Id, entity: EntityRef) -> EntityRef {
        self.objects
            .entry(id.cache_key(type_name))
            .or_insert(entity)
            .value()
            .clone()
    }

    pub fn evict(&self, type_name: &str, id: &Id) -> Option<EntityRef> {
        self.objects
            .remove(&id.cache_key(type_name))
            .map(|(_, e)| e)
    }

    pub fn clear(&self) {
        self.objects.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
