use dashmap::DashMap;
use quarry_cache::TtlCache;
use quarry_core::QuarryConfig;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::entity::{Entity, EntityRef};
use crate::error::{Result, StorageError};
use crate::events::{EventArgs, EventKind};
use crate::metadata::{derive, EntityDef, Metadata};
use crate::plugin::{PluginFactory, PluginSettings};
use crate::value::Record;

/// Registry of entity definitions and their derived metadata.
///
/// Metadata is derived on first use and kept until its definition is
/// replaced or it is evicted, since listeners and methods registered at
/// runtime live on it. Plugins bound by a definition are instantiated and
/// bound each time metadata is derived.
pub struct Schema {
    defs: DashMap<String, Arc<EntityDef>>,
    plugins: DashMap<String, PluginFactory>,
    cache: TtlCache<String, Arc<Metadata>>,
    config: Arc<QuarryConfig>,
}

impl Schema {
    pub fn new(config: Arc<QuarryConfig>) -> Self {
        Self {
            defs: DashMap::new(),
            plugins: DashMap::new(),
            cache: TtlCache::unbounded(),
            config,
        }
    }

    pub fn config(&self) -> &Arc<QuarryConfig> {
        &self.config
    }

    /// Register (or replace) a definition. Cached metadata of the type is
    /// dropped.
    pub fn define(&self, def: EntityDef) {
        let name = def.type_name().to_string();
        self.cache.remove(&name);
        self.defs.insert(name, Arc::new(def));
    }

    pub fn is_defined(&self, type_name: &str) -> bool {
        self.defs.contains_key(type_name)
    }

    pub fn register_plugin(&self, name: impl Into<String>, factory: PluginFactory) {
        self.plugins.insert(name.into(), factory);
    }

    /// Metadata of `type_name`, derived on the first call.
    pub fn metadata_for(&self, type_name: &str) -> Result<Arc<Metadata>> {
        self.cache
            .get_or_try_insert_with(&type_name.to_string(), || self.build(type_name))
    }

    /// Drop the cached metadata of one type, listeners and plugin state
    /// included.
    pub fn evict(&self, type_name: &str) {
        self.cache.remove(&type_name.to_string());
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    /// A new, unsaved entity of `type_name`.
    pub fn new_entity(&self, type_name: &str) -> Result<EntityRef> {
        Ok(EntityRef::new(Entity::new(self.metadata_for(type_name)?)))
    }

    /// The concrete type a record of `meta`'s hierarchy belongs to.
    pub fn concrete_meta(&self, meta: &Arc<Metadata>, record: &Record) -> Result<Arc<Metadata>> {
        let Some(inheritance) = meta.inheritance() else {
            return Ok(meta.clone());
        };
        let value = record
            .get(meta.field_of(&inheritance.by))
            .or_else(|| record.get(&inheritance.by));
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(meta.clone());
        };
        match inheritance.resolve(value) {
            Some(name) if name == meta.type_name() => Ok(meta.clone()),
            Some(name) => {
                let concrete = self.metadata_for(name)?;
                if !concrete.is_a(meta.type_name()) {
                    return Err(StorageError::Inconsistent(format!(
                        "record of '{}' resolves to unrelated type '{name}'",
                        meta.type_name()
                    )));
                }
                Ok(concrete)
            }
            None => Err(StorageError::Inconsistent(format!(
                "unknown discriminator value '{value}' for '{}'",
                meta.type_name()
            ))),
        }
    }

    /// Build a loaded entity from a raw record and raise `after_read` on it.
    pub async fn materialize(&self, meta: &Arc<Metadata>, record: &Record) -> Result<EntityRef> {
        let concrete = self.concrete_meta(meta, record)?;
        let props = concrete.fields_to_props(record);
        let entity = EntityRef::new(Entity::loaded(concrete.clone(), props));
        concrete
            .raise_for_entity(EventKind::AfterRead, EventArgs::Entity(entity.clone()))
            .await?;
        Ok(entity)
    }

    fn chain(&self, type_name: &str) -> Result<Vec<Arc<EntityDef>>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(type_name.to_string());
        while let Some(name) = next {
            if !seen.insert(name.clone()) {
                return Err(StorageError::invalid_definition(
                    type_name,
                    format!("cyclic extends through '{name}'"),
                ));
            }
            let def = self
                .defs
                .get(&name)
                .map(|d| d.value().clone())
                .ok_or_else(|| StorageError::UnknownType(name.clone()))?;
            next = def.parent.clone();
            chain.push(def);
        }
        chain.reverse();
        Ok(chain)
    }

    fn build(&self, type_name: &str) -> Result<Arc<Metadata>> {
        let chain = self.chain(type_name)?;
        let meta = derive(&chain)?;
        for spec in meta.bindings() {
            let factory = self
                .plugins
                .get(spec.plugin())
                .map(|f| f.value().clone())
                .ok_or_else(|| StorageError::UnknownPlugin(spec.plugin().to_string()))?;
            let settings = PluginSettings::resolve(spec, &self.config);
            factory(&settings)?.bind(&meta)?;
        }
        debug!(
            type_name,
            collection = meta.collection(),
            ids = ?meta.id_names(),
            plugins = meta.bindings().len(),
            "Derived entity metadata"
        );
        Ok(Arc::new(meta))
    }
}
