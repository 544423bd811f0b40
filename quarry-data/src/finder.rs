use std::collections::VecDeque;
use std::sync::Arc;

use crate::adapter::{Query, StorageAdapter};
use crate::entity::EntityRef;
use crate::error::{Result, StorageError};
use crate::metadata::Metadata;
use crate::schema::Schema;
use crate::value::Record;

/// Lazy cursor over the records matching a query.
///
/// Nothing is read until the first fetch. Entities produced by a finder are
/// always fresh instances: the identity map is neither consulted nor filled.
pub struct Finder {
    adapter: Arc<dyn StorageAdapter>,
    query: Query,
    binding: Option<(Arc<Schema>, Arc<Metadata>)>,
    rows: Option<VecDeque<Record>>,
}

impl Finder {
    pub fn new(adapter: Arc<dyn StorageAdapter>, query: Query) -> Self {
        Self {
            adapter,
            query,
            binding: None,
            rows: None,
        }
    }

    /// Bind the finder to a type so records can be materialized.
    pub(crate) fn bind(mut self, schema: Arc<Schema>, meta: Arc<Metadata>) -> Self {
        self.binding = Some((schema, meta));
        self
    }

    pub fn sort(mut self, name: impl Into<String>, ascending: bool) -> Self {
        self.query = self.query.sort(name, ascending);
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.query = self.query.skip(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.query = self.query.limit(n);
        self
    }

    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.query = self.query.fields(fields);
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    async fn rows(&mut self) -> Result<&mut VecDeque<Record>> {
        if self.rows.is_none() {
            let rows = self.adapter.select(&self.query).await?;
            self.rows = Some(rows.into());
        }
        Ok(self.rows.get_or_insert_with(VecDeque::new))
    }

    /// Next record, `None` once exhausted.
    pub async fn fetch(&mut self) -> Result<Option<Record>> {
        Ok(self.rows().await?.pop_front())
    }

    /// Every remaining record.
    pub async fn fetch_all(mut self) -> Result<Vec<Record>> {
        Ok(self.rows().await?.drain(..).collect())
    }

    /// Call `f` with every remaining record; returns how many there were.
    pub async fn each<F>(mut self, mut f: F) -> Result<usize>
    where
        F: FnMut(Record),
    {
        let rows = self.rows().await?;
        let n = rows.len();
        rows.drain(..).for_each(&mut f);
        Ok(n)
    }

    /// Number of records matching the query, ignoring skip and limit.
    pub async fn count(&self) -> Result<u64> {
        self.adapter.count(&self.query).await
    }

    fn binding(&self) -> Result<(Arc<Schema>, Arc<Metadata>)> {
        self.binding.clone().ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "finder on '{}' is not bound to an entity type",
                self.query.collection
            ))
        })
    }

    pub async fn fetch_entity(&mut self) -> Result<Option<EntityRef>> {
        let (schema, meta) = self.binding()?;
        match self.fetch().await? {
            Some(record) => schema.materialize(&meta, &record).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn fetch_all_entities(mut self) -> Result<Vec<EntityRef>> {
        let (schema, meta) = self.binding()?;
        let records: Vec<Record> = self.rows().await?.drain(..).collect();
        let mut entities = Vec::with_capacity(records.len());
        for record in &records {
            entities.push(schema.materialize(&meta, record).await?);
        }
        Ok(entities)
    }

    pub async fn each_entity<F>(self, mut f: F) -> Result<usize>
    where
        F: FnMut(EntityRef),
    {
        let entities = self.fetch_all_entities().await?;
        let n = entities.len();
        entities.into_iter().for_each(&mut f);
        Ok(n)
    }
}
