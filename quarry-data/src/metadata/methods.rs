use dashmap::DashMap;
use std::sync::Arc;

use crate::entity::Entity;
use crate::error::{Result, StorageError};
use crate::value::Value;

/// Instance method invocable on entities of a type.
pub type DynamicMethod = Arc<dyn Fn(&Entity, &[Value]) -> Result<Value> + Send + Sync>;

/// Type-level method.
pub type StaticMethod = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Named methods added to a type by its definition and by plugins.
///
/// Lookups happen at call time, so plugins bound after a method was first
/// called still take effect.
#[derive(Default)]
pub struct MethodRegistry {
    type_name: String,
    dynamic: DashMap<String, DynamicMethod>,
    statics: DashMap<String, StaticMethod>,
}

impl MethodRegistry {
    pub(crate) fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            ..Self::default()
        }
    }

    pub fn add_dynamic(&self, name: impl Into<String>, method: DynamicMethod) {
        self.dynamic.insert(name.into(), method);
    }

    pub fn add_static(&self, name: impl Into<String>, method: StaticMethod) {
        self.statics.insert(name.into(), method);
    }

    /// Whether `name` resolves to a dynamic or static method.
    pub fn has_method(&self, name: &str) -> bool {
        self.dynamic.contains_key(name) || self.statics.contains_key(name)
    }

    pub(crate) fn dynamic(&self, name: &str) -> Result<DynamicMethod> {
        self.dynamic
            .get(name)
            .map(|m| m.value().clone())
            .ok_or_else(|| self.not_implemented(name))
    }

    /// Call a dynamic method, falling back to a static one of the same name.
    pub fn call(&self, name: &str, entity: &Entity, args: &[Value]) -> Result<Value> {
        if let Some(method) = self.dynamic.get(name).map(|m| m.value().clone()) {
            return method(entity, args);
        }
        self.call_static(name, args)
    }

    pub fn call_static(&self, name: &str, args: &[Value]) -> Result<Value> {
        let method = self
            .statics
            .get(name)
            .map(|m| m.value().clone())
            .ok_or_else(|| self.not_implemented(name))?;
        method(args)
    }

    fn not_implemented(&self, name: &str) -> StorageError {
        StorageError::NotImplemented {
            type_name: self.type_name.clone(),
            method: name.to_string(),
        }
    }
}
