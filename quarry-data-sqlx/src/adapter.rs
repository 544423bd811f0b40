use async_trait::async_trait;
use quarry_core::QuarryConfig;
use quarry_data::adapter::{AdapterFactory, Alias, Query, StorageAdapter};
use quarry_data::{
    Condition, Dialect, Record, Result, SqlRenderer, Statement, StorageError, Value, WriteSet,
};
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyQueryResult, AnyRow};
use sqlx::{Any, AnyPool, Column, Row, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::SqlxErrorExt;

type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

/// Storage adapter running rendered SQL over an `sqlx::AnyPool`.
///
/// Statements go to the pool, or to the open transaction between `begin`
/// and `commit`/`rollback`. Generated keys are read back with `RETURNING`
/// on SQLite and Postgres, and from the driver's last insert id otherwise.
pub struct SqlxAdapter {
    pool: AnyPool,
    renderer: SqlRenderer,
    tx: Mutex<Option<Transaction<'static, Any>>>,
}

impl SqlxAdapter {
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            pool,
            renderer: SqlRenderer::new(dialect),
            tx: Mutex::new(None),
        }
    }

    /// Build a lazily connecting pool for `url`; the dialect follows the
    /// url scheme.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(SqlxErrorExt::into_storage_error)?;
        Ok(Self::new(pool, Dialect::from_url(url)))
    }

    /// Build from domain settings: `url` (required) and `max_connections`
    /// (default 10).
    pub fn from_config(settings: &QuarryConfig) -> Result<Self> {
        let url: String = settings.get("url")?;
        let max_connections = settings.get_or("max_connections", 10_i64);
        let max_connections = u32::try_from(max_connections)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!(
                    "max_connections must be a positive integer, got {max_connections}"
                ))
            })?;
        Self::connect_lazy(&url, max_connections)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.renderer.dialect()
    }

    /// Run raw SQL without parameters, e.g. schema setup. Returns the number
    /// of affected rows.
    pub async fn execute_sql(&self, sql: &str) -> Result<u64> {
        let statement = Statement {
            sql: sql.to_string(),
            params: Vec::new(),
        };
        Ok(self.execute(&statement).await?.rows_affected())
    }

    async fn execute(&self, statement: &Statement) -> Result<AnyQueryResult> {
        debug!(sql = %statement.sql, params = statement.params.len(), "sqlx execute");
        let query = bind_all(sqlx::query(&statement.sql), &statement.params);
        let mut tx = self.tx.lock().await;
        if let Some(tx) = tx.as_mut() {
            return query.execute(&mut **tx).await.map_err(|e| failed(statement, e));
        }
        drop(tx);
        query.execute(&self.pool).await.map_err(|e| failed(statement, e))
    }

    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<AnyRow>> {
        debug!(sql = %statement.sql, params = statement.params.len(), "sqlx fetch");
        let query = bind_all(sqlx::query(&statement.sql), &statement.params);
        let mut tx = self.tx.lock().await;
        if let Some(tx) = tx.as_mut() {
            return query.fetch_all(&mut **tx).await.map_err(|e| failed(statement, e));
        }
        drop(tx);
        query.fetch_all(&self.pool).await.map_err(|e| failed(statement, e))
    }
}

impl std::fmt::Debug for SqlxAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxAdapter")
            .field("dialect", &self.renderer.dialect())
            .finish_non_exhaustive()
    }
}

/// Factory building a [`SqlxAdapter`] from `storage.domains.<key>.*`.
pub fn factory() -> AdapterFactory {
    Arc::new(|_key: &str, settings: &QuarryConfig| -> Result<Arc<dyn StorageAdapter>> {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(SqlxAdapter::from_config(settings)?);
        Ok(adapter)
    })
}

fn failed(statement: &Statement, err: sqlx::Error) -> StorageError {
    error!(sql = %statement.sql, error = %err, "sqlx statement failed");
    err.into_storage_error()
}

fn bind_all<'q>(query: AnyQuery<'q>, params: &[Value]) -> AnyQuery<'q> {
    params.iter().fold(query, |query, value| match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
    })
}

fn decode_row(row: &AnyRow) -> Result<Record> {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        record.insert(column.name().to_string(), decode_column(row, index)?);
    }
    Ok(record)
}

fn decode_column(row: &AnyRow, index: usize) -> Result<Value> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Int));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Float));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Bool));
    }
    row.try_get::<Option<String>, _>(index)
        .map(|v| v.map_or(Value::Null, Value::Text))
        .map_err(SqlxErrorExt::into_storage_error)
}

#[async_trait]
impl StorageAdapter for SqlxAdapter {
    async fn select(&self, query: &Query) -> Result<Vec<Record>> {
        let statement = self.renderer.select(query)?;
        self.fetch_all(&statement)
            .await?
            .iter()
            .map(decode_row)
            .collect()
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        let statement = self.renderer.count(query)?;
        let rows = self.fetch_all(&statement).await?;
        let count = match rows.first() {
            Some(row) => row
                .try_get::<i64, _>(0)
                .map_err(SqlxErrorExt::into_storage_error)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<Option<Value>> {
        let statement = self.renderer.insert(collection, record)?;
        let result = self.execute(&statement).await?;
        Ok(result.last_insert_id().map(Value::Int))
    }

    async fn insert_generated(
        &self,
        collection: &str,
        record: &Record,
        field: &str,
    ) -> Result<Option<Value>> {
        let statement = self.renderer.insert_returning(collection, record, field)?;
        if !self.dialect().supports_returning() {
            let result = self.execute(&statement).await?;
            return Ok(result.last_insert_id().map(Value::Int));
        }
        let rows = self.fetch_all(&statement).await?;
        match rows.first() {
            Some(row) => decode_column(row, 0).map(|v| Some(v).filter(|v| !v.is_null())),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        collection: &str,
        cond: &Condition,
        values: &WriteSet,
        alias: &Alias,
    ) -> Result<u64> {
        let statement = self.renderer.update(collection, cond, values, alias)?;
        Ok(self.execute(&statement).await?.rows_affected())
    }

    async fn delete(&self, collection: &str, cond: &Condition, alias: &Alias) -> Result<u64> {
        let statement = self.renderer.delete(collection, cond, alias)?;
        Ok(self.execute(&statement).await?.rows_affected())
    }

    async fn begin(&self) -> Result<()> {
        let mut tx = self.tx.lock().await;
        if tx.is_some() {
            return Err(StorageError::InvalidArgument(
                "a transaction is already open".into(),
            ));
        }
        *tx = Some(self.pool.begin().await.map_err(SqlxErrorExt::into_storage_error)?);
        debug!("sqlx transaction started");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let tx = self.tx.lock().await.take();
        let tx = tx.ok_or_else(|| StorageError::InvalidArgument("no open transaction".into()))?;
        tx.commit().await.map_err(SqlxErrorExt::into_storage_error)?;
        debug!("sqlx transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.tx.lock().await.take();
        let tx = tx.ok_or_else(|| StorageError::InvalidArgument("no open transaction".into()))?;
        tx.rollback().await.map_err(SqlxErrorExt::into_storage_error)?;
        debug!("sqlx transaction rolled back");
        Ok(())
    }
}
