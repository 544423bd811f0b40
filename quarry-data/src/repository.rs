use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::adapter::{Query, StorageAdapter};
use crate::codec::coerce;
use crate::condition::{Condition, Lookup, Term};
use crate::entity::{Entity, EntityRef};
use crate::error::{Result, StorageError};
use crate::events::{EventArgs, EventKind, FindArgs, Saved};
use crate::finder::Finder;
use crate::identity::IdentityMap;
use crate::metadata::Metadata;
use crate::storage::{DispatchArg, Storage};
use crate::value::{Id, Props, Record, Value};

/// Entry point of the data mapper for one unit of work.
///
/// Holds the identity map: within one repository every stored row is
/// represented by at most one live [`EntityRef`]. Create one repository per
/// request or job; they all share the process-wide [`Storage`].
pub struct Repository {
    storage: Arc<Storage>,
    identity: IdentityMap,
}

impl Repository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            identity: IdentityMap::new(),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn metadata_for(&self, type_name: &str) -> Result<Arc<Metadata>> {
        self.storage.schema().metadata_for(type_name)
    }

    /// A new, unsaved entity of `type_name`.
    pub fn new_entity(&self, type_name: &str) -> Result<EntityRef> {
        self.storage.schema().new_entity(type_name)
    }

    fn adapter(&self, meta: &Metadata, arg: &DispatchArg) -> Result<Arc<dyn StorageAdapter>> {
        self.storage.select_adapter(meta.domain(), arg)
    }

    fn query(meta: &Metadata, cond: Condition) -> Query {
        Query::new(meta.collection(), cond).alias(meta.field_aliases().clone())
    }

    fn resolve(meta: &Metadata, lookup: Lookup) -> Result<(Condition, Option<Id>)> {
        Ok(match lookup {
            Lookup::Id(id) => (meta.id_condition(&id)?, Some(id)),
            Lookup::Cond(cond) => {
                let id = meta.id_of_condition(&cond);
                (cond, id)
            }
        })
    }

    /// Decode a record into its concrete type and primary key.
    fn decode(&self, meta: &Arc<Metadata>, record: &Record) -> Result<(Arc<Metadata>, Props, Id)> {
        let concrete = self.storage.schema().concrete_meta(meta, record)?;
        let props = concrete.fields_to_props(record);
        let id = concrete.id_of_props(&props).ok_or_else(|| {
            StorageError::Inconsistent(format!(
                "record of '{}' carries no primary key",
                concrete.type_name()
            ))
        })?;
        Ok((concrete, props, id))
    }

    /// Build a loaded entity and raise `after_read` on it.
    async fn materialize(concrete: Arc<Metadata>, props: Props) -> Result<EntityRef> {
        let entity = EntityRef::new(Entity::loaded(concrete.clone(), props));
        concrete
            .raise_for_entity(EventKind::AfterRead, EventArgs::Entity(entity.clone()))
            .await?;
        Ok(entity)
    }

    /// One entity by primary key or condition.
    ///
    /// A primary-key lookup that hits the identity map returns the live
    /// entity without any I/O. A record read from storage (or supplied by a
    /// `before_find` listener) never replaces an entity already in the map.
    pub async fn find_one(&self, type_name: &str, lookup: impl Into<Lookup>) -> Result<EntityRef> {
        let meta = self.metadata_for(type_name)?;
        let root = meta.root_type().to_string();
        let (cond, id) = Self::resolve(&meta, lookup.into())?;

        if let Some(id) = &id {
            if let Some(hit) = self.identity.get(&root, id) {
                trace!(type_name, id = %id, "Identity map hit");
                return Ok(hit);
            }
        }

        let dispatched = meta
            .raise(
                EventKind::BeforeFind,
                EventArgs::Find(FindArgs::One {
                    cond: cond.clone(),
                    id: id.clone(),
                }),
            )
            .await?;
        let served = dispatched
            .and_then(|d| d.into_result())
            .and_then(|records| records.into_iter().next());

        let (record, from_listener) = match served {
            Some(record) => (record, true),
            None => {
                let arg = id
                    .clone()
                    .map_or_else(|| DispatchArg::Condition(cond.clone()), DispatchArg::Id);
                let adapter = self.adapter(&meta, &arg)?;
                let record = adapter
                    .find_one(&Self::query(&meta, cond.clone()))
                    .await?
                    .ok_or_else(|| StorageError::EntityNotFound {
                        type_name: type_name.to_string(),
                        cond: cond.to_string(),
                    })?;
                (record, false)
            }
        };

        let (concrete, props, fetched) = self.decode(&meta, &record)?;
        if let Some(id) = &id {
            if id.canonical() != fetched.canonical() {
                return Err(StorageError::Inconsistent(format!(
                    "lookup of '{type_name}' by id {id} returned the record of id {fetched}"
                )));
            }
        }
        if let Some(hit) = self.identity.get(&root, &fetched) {
            trace!(type_name, id = %fetched, "Identity map hit after read");
            return Ok(hit);
        }

        let entity = Self::materialize(concrete, props).await?;
        let live = self.identity.put(&root, &fetched, entity.clone());
        if !EntityRef::ptr_eq(&live, &entity) {
            return Ok(live);
        }
        meta.raise(
            EventKind::AfterFind,
            EventArgs::FoundOne {
                cond,
                id: fetched,
                entity: entity.clone(),
                record,
                from_listener,
            },
        )
        .await?;
        Ok(entity)
    }

    /// Entities for a list of scalar primary keys, in request order.
    ///
    /// Ids without a stored record are left out of the result. Records
    /// missing from the identity map and not supplied by a `before_find`
    /// listener are read with a single `IN` query.
    pub async fn find_multi<V: Into<Value>>(
        &self,
        type_name: &str,
        ids: impl IntoIterator<Item = V>,
    ) -> Result<Vec<(Value, EntityRef)>> {
        let meta = self.metadata_for(type_name)?;
        if meta.is_composite() {
            return Err(StorageError::CompositeKeyUnsupported {
                type_name: type_name.to_string(),
                operation: "find_multi",
            });
        }
        let root = meta.root_type().to_string();
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();

        let mut live: HashMap<String, EntityRef> = HashMap::new();
        let mut missing: Vec<Value> = Vec::new();
        let mut pending: HashSet<String> = HashSet::new();
        for id in &ids {
            let key = id.key_string();
            if live.contains_key(&key) || pending.contains(&key) {
                continue;
            }
            match self.identity.get(&root, &Id::Scalar(id.clone())) {
                Some(hit) => {
                    live.insert(key, hit);
                }
                None => {
                    pending.insert(key);
                    missing.push(id.clone());
                }
            }
        }
        if missing.is_empty() {
            return Ok(Self::in_order(&ids, &live));
        }

        let mut records: Vec<(Value, Record)> = Vec::new();
        let mut from_listener: Vec<Value> = Vec::new();
        let dispatched = meta
            .raise(
                EventKind::BeforeFind,
                EventArgs::Find(FindArgs::Multi { ids: ids.clone() }),
            )
            .await?;
        if let Some(served) = dispatched.and_then(|d| d.into_result()) {
            for record in served {
                let (_, _, id) = self.decode(&meta, &record)?;
                let Some(value) = id.as_scalar().cloned() else {
                    continue;
                };
                if pending.remove(&value.key_string()) {
                    from_listener.push(value.clone());
                    records.push((value, record));
                }
            }
        }

        let unresolved: Vec<Value> = missing
            .into_iter()
            .filter(|id| pending.contains(&id.key_string()))
            .collect();
        if !unresolved.is_empty() {
            let id_name = meta.id_names()[0].clone();
            let cond = Condition::from(Term::In(id_name, unresolved));
            let adapter = self.adapter(&meta, &DispatchArg::Condition(cond.clone()))?;
            for record in adapter.select(&Self::query(&meta, cond)).await? {
                let (_, _, id) = self.decode(&meta, &record)?;
                if let Some(value) = id.as_scalar().cloned() {
                    records.push((value, record));
                }
            }
        }

        let mut entities = Vec::with_capacity(records.len());
        for (value, record) in &records {
            let (concrete, props, id) = self.decode(&meta, record)?;
            if let Some(hit) = self.identity.get(&root, &id) {
                live.insert(value.key_string(), hit);
                continue;
            }
            let entity = Self::materialize(concrete, props).await?;
            let winner = self.identity.put(&root, &id, entity.clone());
            if EntityRef::ptr_eq(&winner, &entity) {
                entities.push((value.clone(), entity));
            }
            live.insert(value.key_string(), winner);
        }

        meta.raise(
            EventKind::AfterFind,
            EventArgs::FoundMulti {
                ids: ids.clone(),
                entities,
                records,
                from_listener,
            },
        )
        .await?;
        Ok(Self::in_order(&ids, &live))
    }

    fn in_order(ids: &[Value], live: &HashMap<String, EntityRef>) -> Vec<(Value, EntityRef)> {
        let mut seen = HashSet::new();
        ids.iter()
            .filter(|id| seen.insert(id.key_string()))
            .filter_map(|id| live.get(&id.key_string()).map(|e| (id.clone(), e.clone())))
            .collect()
    }

    /// A lazy cursor over `type_name` records matching `cond`.
    ///
    /// Finders bypass the identity map and the find events; every entity
    /// they produce is a fresh instance.
    pub fn find(&self, type_name: &str, cond: Condition) -> Result<Finder> {
        let meta = self.metadata_for(type_name)?;
        let adapter = self.adapter(&meta, &DispatchArg::Condition(cond.clone()))?;
        Ok(Finder::new(adapter, Self::query(&meta, cond)).bind(self.storage.schema().clone(), meta))
    }

    /// Create or update `entity`, between `before_save` and `after_save`.
    pub async fn save(&self, entity: &EntityRef) -> Result<Saved> {
        let meta = entity.meta().clone();
        Self::check_writable(&meta)?;
        meta.raise_for_entity(EventKind::BeforeSave, EventArgs::Entity(entity.clone()))
            .await?;
        let saved = if entity.is_new().await {
            Saved::Created(self.create(entity).await?)
        } else {
            Saved::Updated(self.update(entity).await?)
        };
        meta.raise_for_entity(
            EventKind::AfterSave,
            EventArgs::Saved(entity.clone(), saved.clone()),
        )
        .await?;
        Ok(saved)
    }

    fn check_writable(meta: &Metadata) -> Result<()> {
        if meta.is_readonly() {
            return Err(StorageError::ReadOnly {
                type_name: meta.type_name().to_string(),
                prop: None,
            });
        }
        if meta.is_nonp() {
            return Err(StorageError::NonPersistable(meta.type_name().to_string()));
        }
        Ok(())
    }

    /// Insert a new entity and register it in the identity map.
    ///
    /// Returns the primary key, including any store-generated component.
    pub async fn create(&self, entity: &EntityRef) -> Result<Id> {
        let meta = entity.meta().clone();
        if meta.is_nonp() {
            return Err(StorageError::NonPersistable(meta.type_name().to_string()));
        }
        meta.raise_for_entity(EventKind::BeforeCreate, EventArgs::Entity(entity.clone()))
            .await?;

        let (mut record, arg) = {
            let mut state = entity.lock().await;
            Self::stamp_discriminator(&meta, &mut state)?;
            Self::check_complete(&meta, &state)?;
            let props = state.to_props();
            let record = meta.props_to_fields(&props);
            let arg = DispatchArg::Entity {
                type_name: meta.type_name().to_string(),
                props,
            };
            (record, arg)
        };

        let adapter = self.adapter(&meta, &arg)?;
        let generated = match meta.autoincr().map(|prop| meta.field_of(prop)) {
            Some(field) if record.get(field).map_or(true, Value::is_null) => {
                record.remove(field);
                let generated = adapter
                    .insert_generated(meta.collection(), &record, field)
                    .await?;
                if generated.is_none() {
                    return Err(StorageError::Inconsistent(format!(
                        "insert into '{}' reported no value for the generated field '{field}'",
                        meta.collection()
                    )));
                }
                generated
            }
            _ => {
                adapter.insert(meta.collection(), &record).await?;
                None
            }
        };
        let id = {
            let mut state = entity.lock().await;
            state.mark_saved(true, generated);
            state.id()?
        };
        debug!(type_name = meta.type_name(), id = %id, "Created entity");
        self.identity.put(meta.root_type(), &id, entity.clone());

        meta.raise_for_entity(
            EventKind::AfterCreate,
            EventArgs::Created(entity.clone(), id.clone()),
        )
        .await?;
        Ok(id)
    }

    /// Fill the inheritance discriminator of a subtype entity left unset.
    fn stamp_discriminator(meta: &Metadata, entity: &mut Entity) -> Result<()> {
        let Some(inheritance) = meta.inheritance() else {
            return Ok(());
        };
        let Some(value) = inheritance.value_of(meta.type_name()) else {
            return Ok(());
        };
        let prop = meta
            .prop_aliases()
            .get(&inheritance.by)
            .cloned()
            .unwrap_or_else(|| inheritance.by.clone());
        let Some(kind) = meta.prop(&prop).map(|p| p.kind) else {
            return Ok(());
        };
        if !entity.changes().contains_key(&prop) {
            entity.set(&prop, coerce(kind, &Value::Text(value.to_string())))?;
        }
        Ok(())
    }

    fn check_complete(meta: &Metadata, entity: &Entity) -> Result<()> {
        for prop in meta.props() {
            if prop.nonp || prop.optional || prop.autoincr {
                continue;
            }
            if let Err(err @ StorageError::IncompleteProperty { .. }) = entity.raw(&prop.name) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Write the pending changes of a loaded entity.
    ///
    /// Returns `false` without touching storage when nothing changed, and
    /// `false` when the optimistic guard no longer matches the stored row.
    pub async fn update(&self, entity: &EntityRef) -> Result<bool> {
        let meta = entity.meta().clone();
        Self::check_writable(&meta)?;
        {
            let state = entity.lock().await;
            if state.is_new() {
                return Err(StorageError::NotSaved(meta.type_name().to_string()));
            }
            if !state.is_changed() {
                return Ok(false);
            }
        }

        meta.raise_for_entity(EventKind::BeforeUpdate, EventArgs::Entity(entity.clone()))
            .await?;

        let updated = {
            let mut state = entity.lock().await;
            let arg = DispatchArg::Entity {
                type_name: meta.type_name().to_string(),
                props: state.to_props(),
            };
            let adapter = self.adapter(&meta, &arg)?;
            let updated = adapter.update_entity(&state).await?;
            if updated {
                state.mark_saved(false, None);
            } else {
                debug!(
                    type_name = meta.type_name(),
                    id = ?state.id().ok(),
                    "Optimistic update conflict"
                );
            }
            updated
        };

        meta.raise_for_entity(
            EventKind::AfterUpdate,
            EventArgs::Updated(entity.clone(), updated),
        )
        .await?;
        Ok(updated)
    }

    /// Delete the stored row of `entity` and drop it from the identity map.
    pub async fn delete(&self, entity: &EntityRef) -> Result<bool> {
        let meta = entity.meta().clone();
        if meta.is_readonly() {
            return Err(StorageError::ReadOnly {
                type_name: meta.type_name().to_string(),
                prop: None,
            });
        }
        let (id, props) = {
            let state = entity.lock().await;
            if state.is_new() {
                return Err(StorageError::NotSaved(meta.type_name().to_string()));
            }
            (state.id()?, state.to_props())
        };

        meta.raise_for_entity(EventKind::BeforeDelete, EventArgs::Entity(entity.clone()))
            .await?;

        let arg = DispatchArg::Entity {
            type_name: meta.type_name().to_string(),
            props,
        };
        let adapter = self.adapter(&meta, &arg)?;
        let count = adapter
            .delete(meta.collection(), &meta.id_condition(&id)?, meta.field_aliases())
            .await?;
        self.identity.evict(meta.root_type(), &id);
        if count > 1 {
            return Err(StorageError::UnexpectedRowCount {
                type_name: meta.type_name().to_string(),
                operation: "delete",
                count,
            });
        }

        let deleted = count == 1;
        meta.raise_for_entity(
            EventKind::AfterDelete,
            EventArgs::Deleted(entity.clone(), deleted),
        )
        .await?;
        Ok(deleted)
    }

    /// Find one entity and delete it.
    pub async fn delete_one(&self, type_name: &str, lookup: impl Into<Lookup>) -> Result<bool> {
        let entity = self.find_one(type_name, lookup).await?;
        self.delete(&entity).await
    }

    /// Delete every entity matching `cond`, one at a time, with events.
    /// Returns the number of entities deleted.
    pub async fn delete_by(&self, type_name: &str, cond: Condition) -> Result<usize> {
        let entities = self.find(type_name, cond)?.fetch_all_entities().await?;
        let mut deleted = 0;
        for entity in &entities {
            if self.delete(entity).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Delete one stored row without materializing an entity.
    pub async fn erase_one(&self, type_name: &str, lookup: impl Into<Lookup>) -> Result<bool> {
        let meta = self.metadata_for(type_name)?;
        let (cond, id) = Self::resolve(&meta, lookup.into())?;
        let count = self.erase(&meta, cond, id.clone(), "erase_one").await?;
        if count > 1 {
            return Err(StorageError::UnexpectedRowCount {
                type_name: type_name.to_string(),
                operation: "erase_one",
                count,
            });
        }
        Ok(count == 1)
    }

    /// Delete every stored row matching `cond` without materializing
    /// entities. Live entities of those rows stay in the identity map.
    pub async fn erase_by(&self, type_name: &str, cond: Condition) -> Result<u64> {
        let meta = self.metadata_for(type_name)?;
        self.erase(&meta, cond, None, "erase_by").await
    }

    async fn erase(
        &self,
        meta: &Arc<Metadata>,
        cond: Condition,
        id: Option<Id>,
        operation: &'static str,
    ) -> Result<u64> {
        meta.raise(
            EventKind::BeforeErase,
            EventArgs::Erase {
                cond: cond.clone(),
                id: id.clone(),
            },
        )
        .await?;

        let arg = id
            .clone()
            .map_or_else(|| DispatchArg::Condition(cond.clone()), DispatchArg::Id);
        let adapter = self.adapter(meta, &arg)?;
        let count = adapter
            .delete(meta.collection(), &cond, meta.field_aliases())
            .await?;
        if let Some(id) = &id {
            self.identity.evict(meta.root_type(), id);
        }
        debug!(type_name = meta.type_name(), operation, count, "Erased records");

        meta.raise(EventKind::AfterErase, EventArgs::Erased { cond, id, count })
            .await?;
        Ok(count)
    }

    /// Drop `entity` from the identity map.
    pub async fn evict(&self, entity: &EntityRef) -> Result<()> {
        let state = entity.lock().await;
        if state.is_new() {
            return Err(StorageError::NotSaved(state.type_name().to_string()));
        }
        self.identity.evict(state.meta().root_type(), &state.id()?);
        Ok(())
    }

    /// Drop the live entity of `type_name` with primary key `id`, if any.
    pub fn evict_id(&self, type_name: &str, id: impl Into<Id>) -> Result<bool> {
        let meta = self.metadata_for(type_name)?;
        Ok(self.identity.evict(meta.root_type(), &id.into()).is_some())
    }

    /// Forget every live entity.
    pub fn clear(&self) {
        self.identity.clear();
    }

    /// Number of live entities.
    pub fn identity_len(&self) -> usize {
        self.identity.len()
    }
}
