use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Result, StorageError};
use crate::metadata::Metadata;
use crate::value::{Id, Props, Value};

/// The mutable state of one mapped object.
///
/// Reads see pending changes first, then the values last known to storage,
/// then declared defaults. Writes only ever touch the pending changes.
#[derive(Clone)]
pub struct Entity {
    meta: Arc<Metadata>,
    original: Props,
    changes: Props,
    is_new: bool,
}

/// Saved state of an entity, restored by [`Entity::restore`].
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    original: Props,
    changes: Props,
    is_new: bool,
}

impl Entity {
    /// A new, unsaved entity.
    pub fn new(meta: Arc<Metadata>) -> Self {
        Self {
            meta,
            original: Props::new(),
            changes: Props::new(),
            is_new: true,
        }
    }

    /// An entity read from storage with `props` as its baseline.
    pub fn loaded(meta: Arc<Metadata>, props: Props) -> Self {
        let mut entity = Self::new(meta);
        entity.mark_loaded(props);
        entity
    }

    pub fn meta(&self) -> &Arc<Metadata> {
        &self.meta
    }

    pub fn type_name(&self) -> &str {
        self.meta.type_name()
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Stored value of `prop`, bypassing any getter.
    pub fn raw(&self, prop: &str) -> Result<Value> {
        if let Some(value) = self.changes.get(prop).or_else(|| self.original.get(prop)) {
            return Ok(value.clone());
        }
        match self.meta.prop(prop) {
            None => Err(StorageError::unknown_property(self.type_name(), prop)),
            Some(p) => p
                .default
                .clone()
                .ok_or_else(|| StorageError::incomplete_property(self.type_name(), prop)),
        }
    }

    /// Value of `prop`, passed through its getter when one is declared.
    pub fn get(&self, prop: &str) -> Result<Value> {
        let value = self.raw(prop)?;
        match self.meta.prop(prop).and_then(|p| p.getter.as_deref()) {
            Some(getter) => {
                let getter = self.meta.methods().dynamic(getter)?;
                getter(self, &[value])
            }
            None => Ok(value),
        }
    }

    /// Whether `prop` currently resolves to a value (default included).
    pub fn has_value(&self, prop: &str) -> bool {
        self.raw(prop).is_ok()
    }

    /// Record a pending change.
    ///
    /// Fails for undeclared properties, and on a loaded entity for key
    /// properties, read-only properties and read-only types.
    pub fn set(&mut self, prop: &str, value: impl Into<Value>) -> Result<()> {
        let Some(meta) = self.meta.prop(prop) else {
            return Err(StorageError::unknown_property(self.type_name(), prop));
        };
        if !self.is_new {
            if self.meta.is_readonly() {
                return Err(StorageError::ReadOnly {
                    type_name: self.type_name().to_string(),
                    prop: None,
                });
            }
            if meta.readonly || meta.id {
                return Err(StorageError::ReadOnly {
                    type_name: self.type_name().to_string(),
                    prop: Some(prop.to_string()),
                });
            }
        }
        let mut value = value.into();
        if let Some(setter) = meta.setter.as_deref() {
            let setter = self.meta.methods().dynamic(setter)?;
            value = setter(self, &[value])?;
        }
        self.changes.insert(prop.to_string(), value);
        Ok(())
    }

    /// The primary key: a scalar, or named components for composite keys.
    pub fn id(&self) -> Result<Id> {
        let names = self.meta.id_names();
        if let [name] = names {
            return self.raw(name).map(Id::Scalar);
        }
        let mut parts = std::collections::BTreeMap::new();
        for name in names {
            parts.insert(name.clone(), self.raw(name)?);
        }
        Ok(Id::Composite(parts))
    }

    /// Properties assigned since the last load or save.
    pub fn changes(&self) -> &Props {
        &self.changes
    }

    /// Values as last known to storage.
    pub fn original(&self) -> &Props {
        &self.original
    }

    pub fn is_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Drop pending changes.
    pub fn revert(&mut self) {
        self.changes.clear();
    }

    /// Current value of every property that has one.
    pub fn to_props(&self) -> Props {
        self.meta
            .props()
            .iter()
            .filter_map(|p| self.raw(&p.name).ok().map(|v| (p.name.clone(), v)))
            .collect()
    }

    /// Replace the baseline with `props` after a read from storage.
    pub fn mark_loaded(&mut self, props: Props) {
        self.is_new = false;
        self.original = props;
        self.changes.clear();
    }

    /// Fold pending changes into the baseline after a successful write.
    ///
    /// On create, defaults are persisted along with the entity and become
    /// part of the baseline, and a store-generated key is injected into the
    /// autoincrement component.
    pub fn mark_saved(&mut self, is_create: bool, generated: Option<Value>) {
        if is_create {
            let current = self.to_props();
            self.original = current;
        } else {
            let changes = std::mem::take(&mut self.changes);
            self.original.extend(changes);
        }
        self.changes.clear();
        self.is_new = false;

        if let Some(value) = generated.filter(|_| is_create) {
            if let Some(name) = self.meta.autoincr() {
                self.original.insert(name.to_string(), value);
            }
        }
    }

    /// Invoke a dynamic (or static) method registered for the type.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        self.meta.methods().call(method, self, args)
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            original: self.original.clone(),
            changes: self.changes.clone(),
            is_new: self.is_new,
        }
    }

    pub fn restore(&mut self, snapshot: EntitySnapshot) {
        self.original = snapshot.original;
        self.changes = snapshot.changes;
        self.is_new = snapshot.is_new;
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.type_name())
            .field("is_new", &self.is_new)
            .field("original", &self.original)
            .field("changes", &self.changes)
            .finish()
    }
}

/// Shared handle to a live entity.
///
/// Clones point at the same entity; the identity map hands out one handle
/// per stored row, so [`EntityRef::ptr_eq`] is the identity check.
#[derive(Clone)]
pub struct EntityRef {
    meta: Arc<Metadata>,
    inner: Arc<Mutex<Entity>>,
}

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        Self {
            meta: entity.meta.clone(),
            inner: Arc::new(Mutex::new(entity)),
        }
    }

    pub fn meta(&self) -> &Arc<Metadata> {
        &self.meta
    }

    pub fn type_name(&self) -> &str {
        self.meta.type_name()
    }

    pub async fn lock(&self) -> MutexGuard<'_, Entity> {
        self.inner.lock().await
    }

    pub fn ptr_eq(a: &EntityRef, b: &EntityRef) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub async fn get(&self, prop: &str) -> Result<Value> {
        self.lock().await.get(prop)
    }

    pub async fn set(&self, prop: &str, value: impl Into<Value>) -> Result<()> {
        self.lock().await.set(prop, value)
    }

    pub async fn id(&self) -> Result<Id> {
        self.lock().await.id()
    }

    pub async fn is_new(&self) -> bool {
        self.lock().await.is_new()
    }

    pub async fn changes(&self) -> Props {
        self.lock().await.changes().clone()
    }

    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        self.lock().await.call(method, args)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("type", &self.type_name())
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}
