//! The boundary to concrete stores.

use async_trait::async_trait;
use quarry_core::QuarryConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use crate::condition::{Condition, WriteSet};
use crate::entity::Entity;
use crate::error::Result;
use crate::update::UpdatePlan;
use crate::value::{Record, Value};

/// Name → field translation applied by adapters to condition and write-set
/// names.
pub type Alias = BTreeMap<String, String>;

/// A read against one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub collection: String,
    pub cond: Condition,
    /// Fields to return; every field when `None`.
    pub fields: Option<Vec<String>>,
    pub alias: Alias,
    /// `(name, ascending)` pairs.
    pub sort: Vec<(String, bool)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new(collection: impl Into<String>, cond: Condition) -> Self {
        Self {
            collection: collection.into(),
            cond,
            ..Self::default()
        }
    }

    pub fn alias(mut self, alias: Alias) -> Self {
        self.alias = alias;
        self
    }

    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn sort(mut self, name: impl Into<String>, ascending: bool) -> Self {
        self.sort.push((name.into(), ascending));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Resolve `name` through `alias`.
pub fn field_name<'a>(alias: &'a Alias, name: &'a str) -> &'a str {
    alias.get(name).map_or(name, String::as_str)
}

/// A concrete store driver.
///
/// Implementations execute one statement per call and report affected-row
/// counts; the repository derives every consistency decision from them.
#[async_trait]
pub trait StorageAdapter: Send + Sync + 'static {
    /// Records matching `query`.
    async fn select(&self, query: &Query) -> Result<Vec<Record>>;

    /// Insert a record; returns the value generated for the collection's
    /// autoincrement field, if any.
    async fn insert(&self, collection: &str, record: &Record) -> Result<Option<Value>>;

    /// Insert a record whose `field` is left for the store to generate and
    /// return the generated value. Adapters able to read it back within the
    /// insert statement override this.
    async fn insert_generated(
        &self,
        collection: &str,
        record: &Record,
        field: &str,
    ) -> Result<Option<Value>> {
        let _ = field;
        self.insert(collection, record).await
    }

    /// Apply `values` to every record matching `cond`; returns the number of
    /// affected records.
    async fn update(
        &self,
        collection: &str,
        cond: &Condition,
        values: &WriteSet,
        alias: &Alias,
    ) -> Result<u64>;

    async fn delete(&self, collection: &str, cond: &Condition, alias: &Alias) -> Result<u64>;

    async fn begin(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    async fn count(&self, query: &Query) -> Result<u64> {
        let mut query = query.clone();
        query.skip = None;
        query.limit = None;
        Ok(self.select(&query).await?.len() as u64)
    }

    async fn find_one(&self, query: &Query) -> Result<Option<Record>> {
        let mut query = query.clone();
        query.limit = Some(1);
        Ok(self.select(&query).await?.into_iter().next())
    }

    /// Write the pending changes of `entity` with its type's optimistic
    /// update policy. `false` means no record matched the guard.
    ///
    /// Changes that leave nothing to write (non-persisted or `ignore`
    /// properties only) succeed without a statement.
    async fn update_entity(&self, entity: &Entity) -> Result<bool> {
        let plan = UpdatePlan::build(entity)?;
        let meta = entity.meta();
        if plan.values.is_empty() {
            trace!(type_name = meta.type_name(), "Empty write set, skipping update");
            return Ok(true);
        }
        let affected = self
            .update(meta.collection(), &plan.guard, &plan.values, meta.field_aliases())
            .await?;
        Ok(affected > 0)
    }
}

/// Builds an adapter for a resolved domain key from its settings
/// (`storage.domains.<key>.*`, keyed relative to that prefix).
pub type AdapterFactory =
    Arc<dyn Fn(&str, &QuarryConfig) -> Result<Arc<dyn StorageAdapter>> + Send + Sync>;
