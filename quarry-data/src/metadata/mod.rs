//! Entity metadata: storage location, key shape, property mapping and
//! update policy of a mapped type, derived once from its [`EntityDef`].

mod def;
mod derive;
mod methods;
mod policy;

pub use def::{EntityDef, PluginSpec, PropDef};
pub use methods::{DynamicMethod, MethodRegistry, StaticMethod};
pub use policy::{PropKind, PropUpdate, UpdatePolicy};

pub(crate) use derive::derive;

use quarry_events::Dispatched;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::condition::Condition;
use crate::error::{Result, StorageError};
use crate::events::{EventArgs, EventKind, ModelEvents, ModelListener};
use crate::value::{Id, Props, Record, Value};

/// Derived description of one property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropMeta {
    pub name: String,
    pub kind: PropKind,
    pub len: Option<u32>,
    pub default: Option<Value>,
    pub id: bool,
    pub autoincr: bool,
    pub optional: bool,
    pub nonp: bool,
    pub readonly: bool,
    pub field: String,
    pub getter: Option<String>,
    pub setter: Option<String>,
    pub update: PropUpdate,
}

/// Single-table inheritance descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Inheritance {
    /// Discriminator field.
    pub by: String,
    /// Discriminator value (canonical string) → concrete type name.
    pub classes: BTreeMap<String, String>,
}

impl Inheritance {
    pub fn resolve(&self, value: &Value) -> Option<&str> {
        self.classes.get(&value.key_string()).map(String::as_str)
    }

    /// The discriminator value stored for `type_name`.
    pub fn value_of(&self, type_name: &str) -> Option<&str> {
        self.classes
            .iter()
            .find(|(_, t)| t.as_str() == type_name)
            .map(|(v, _)| v.as_str())
    }
}

/// Metadata of one mapped type.
///
/// Owns the type's event hub and method registry: listeners and methods
/// added by plugins live as long as this metadata stays cached.
pub struct Metadata {
    pub(crate) type_name: String,
    pub(crate) lineage: Vec<String>,
    pub(crate) domain: Option<String>,
    pub(crate) collection: String,
    pub(crate) id_names: Vec<String>,
    pub(crate) autoincr: Option<String>,
    pub(crate) update: UpdatePolicy,
    pub(crate) readonly: bool,
    pub(crate) nonp: bool,
    pub(crate) inheritance: Option<Inheritance>,
    pub(crate) props: Vec<PropMeta>,
    pub(crate) prop_index: HashMap<String, usize>,
    pub(crate) props_to_fields: BTreeMap<String, String>,
    pub(crate) fields_to_props: BTreeMap<String, String>,
    pub(crate) spec_update_props: BTreeMap<String, PropUpdate>,
    pub(crate) bindings: Vec<PluginSpec>,
    pub(crate) hooks: HashMap<EventKind, ModelListener>,
    pub(crate) events: ModelEvents,
    pub(crate) methods: MethodRegistry,
}

impl Metadata {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Whether this type is `type_name` or one of its subtypes.
    pub fn is_a(&self, type_name: &str) -> bool {
        self.lineage.iter().any(|t| t == type_name)
    }

    /// Root of the type's hierarchy. Identity and cache keys are scoped to
    /// it, since every type of a hierarchy shares one collection.
    pub fn root_type(&self) -> &str {
        self.lineage.last().map_or(self.type_name.as_str(), String::as_str)
    }

    /// Declared storage domain, `None` for the configured default.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id_names(&self) -> &[String] {
        &self.id_names
    }

    pub fn autoincr(&self) -> Option<&str> {
        self.autoincr.as_deref()
    }

    pub fn is_composite(&self) -> bool {
        self.id_names.len() > 1
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_nonp(&self) -> bool {
        self.nonp
    }

    pub fn inheritance(&self) -> Option<&Inheritance> {
        self.inheritance.as_ref()
    }

    /// Properties in declaration order, inherited ones first.
    pub fn props(&self) -> &[PropMeta] {
        &self.props
    }

    pub fn prop(&self, name: &str) -> Option<&PropMeta> {
        self.prop_index.get(name).map(|&i| &self.props[i])
    }

    /// Persisted property → field name. Adapters use it as the alias map
    /// of queries issued for this type.
    pub fn field_aliases(&self) -> &BTreeMap<String, String> {
        &self.props_to_fields
    }

    /// Field → persisted property name.
    pub fn prop_aliases(&self) -> &BTreeMap<String, String> {
        &self.fields_to_props
    }

    /// Properties with an update policy other than `overwrite`.
    pub fn spec_update_props(&self) -> &BTreeMap<String, PropUpdate> {
        &self.spec_update_props
    }

    pub fn field_of<'a>(&'a self, prop: &'a str) -> &'a str {
        self.props_to_fields.get(prop).map_or(prop, String::as_str)
    }

    pub fn bindings(&self) -> &[PluginSpec] {
        &self.bindings
    }

    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    pub fn events(&self) -> &ModelEvents {
        &self.events
    }

    pub fn add_listener(&self, kind: EventKind, listener: ModelListener) {
        self.events.add_listener(kind, listener);
    }

    pub fn remove_listener(&self, kind: EventKind, listener: &ModelListener) -> bool {
        self.events.remove_listener(&kind, listener)
    }

    /// Raise a class-level event.
    pub async fn raise(&self, kind: EventKind, args: EventArgs) -> Result<Option<Dispatched<Vec<Record>>>> {
        self.events.raise(&kind, args, None).await
    }

    /// Raise an event whose subject is an entity of this type; the type's own
    /// hook for `kind` runs after the registered listeners.
    pub async fn raise_for_entity(
        &self,
        kind: EventKind,
        args: EventArgs,
    ) -> Result<Option<Dispatched<Vec<Record>>>> {
        let hook = self.hooks.get(&kind).cloned();
        self.events.raise(&kind, args, hook).await
    }

    /// Equality condition over the primary key.
    pub fn id_condition(&self, id: &Id) -> Result<Condition> {
        match (id, self.id_names.as_slice()) {
            (Id::Scalar(value), [name]) => Ok(Condition::eq(name.clone(), value.clone())),
            (Id::Composite(parts), names) if names.len() > 1 => {
                let mut cond = Condition::all();
                for name in names {
                    let value = parts.get(name).ok_or_else(|| {
                        StorageError::InvalidArgument(format!(
                            "id of '{}' is missing component '{name}'",
                            self.type_name
                        ))
                    })?;
                    cond = cond.and_eq(name.clone(), value.clone());
                }
                Ok(cond)
            }
            _ => Err(StorageError::InvalidArgument(format!(
                "id '{id}' does not match the primary key of '{}'",
                self.type_name
            ))),
        }
    }

    /// The primary key a condition pins down, if it is exactly one.
    pub fn id_of_condition(&self, cond: &Condition) -> Option<Id> {
        let mut parts = cond.exact_equalities(&self.id_names)?;
        if self.is_composite() {
            Some(Id::Composite(parts))
        } else {
            parts.pop_first().map(|(_, v)| Id::Scalar(v))
        }
    }

    /// Primary key read from a property map.
    pub fn id_of_props(&self, props: &Props) -> Option<Id> {
        if self.is_composite() {
            let mut parts = BTreeMap::new();
            for name in &self.id_names {
                parts.insert(name.clone(), props.get(name)?.clone());
            }
            Some(Id::Composite(parts))
        } else {
            props.get(self.id_names.first()?).cloned().map(Id::Scalar)
        }
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("type_name", &self.type_name)
            .field("domain", &self.domain)
            .field("collection", &self.collection)
            .field("id_names", &self.id_names)
            .field("autoincr", &self.autoincr)
            .field("update", &self.update)
            .field("readonly", &self.readonly)
            .field("nonp", &self.nonp)
            .field("inheritance", &self.inheritance)
            .finish_non_exhaustive()
    }
}
