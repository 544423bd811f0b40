//! An in-process storage adapter.
//!
//! Collections are vectors of records kept in insertion order. Every
//! statement runs under one lock, so each statement is atomic with respect
//! to the others, the way a single SQL statement is.

use async_trait::async_trait;
use quarry_core::{FromConfigValue, QuarryConfig};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapter::{field_name, AdapterFactory, Alias, Query, StorageAdapter};
use crate::condition::{Assignment, CmpOp, Condition, Term, WriteSet};
use crate::error::{Result, StorageError};
use crate::value::{Record, Value};

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, Vec<Record>>,
    serials: HashMap<String, i64>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    /// Saved table states of open transactions, innermost last.
    savepoints: Vec<Tables>,
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    state: Mutex<State>,
    /// Collection → field filled with a generated integer on insert.
    serial_fields: HashMap<String, String>,
    statements: AtomicUsize,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate values for `field` of `collection` on insert when the
    /// record does not carry one.
    pub fn with_serial(mut self, collection: impl Into<String>, field: impl Into<String>) -> Self {
        self.serial_fields.insert(collection.into(), field.into());
        self
    }

    /// Build an adapter from domain settings. `serial.<collection>` names
    /// the generated field of a collection.
    pub fn from_config(settings: &QuarryConfig) -> Result<Self> {
        let mut adapter = Self::new();
        for (collection, field) in settings.section("serial") {
            let field = String::from_config_value(&field, &format!("serial.{collection}"))?;
            adapter = adapter.with_serial(collection, field);
        }
        Ok(adapter)
    }

    /// Number of statements executed so far.
    pub fn statement_count(&self) -> usize {
        self.statements.load(AtomicOrdering::SeqCst)
    }

    /// Every record of `collection`, in insertion order.
    pub async fn rows(&self, collection: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        state
            .tables
            .rows
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a record without counting a statement or generating values.
    pub async fn seed(&self, collection: &str, record: Record) {
        let mut state = self.state.lock().await;
        if let Some(field) = self.serial_fields.get(collection) {
            if let Some(n) = record.get(field).and_then(Value::as_i64) {
                let serial = state.tables.serials.entry(collection.to_string()).or_default();
                *serial = (*serial).max(n);
            }
        }
        state
            .tables
            .rows
            .entry(collection.to_string())
            .or_default()
            .push(record);
    }

    /// Store `record`, filling `serial` from the collection counter when
    /// the record leaves it unset.
    async fn insert_row(
        &self,
        collection: &str,
        record: &Record,
        serial: Option<&str>,
    ) -> Result<Option<Value>> {
        self.trace("insert", collection, &Condition::all());
        let mut state = self.state.lock().await;
        let mut record = record.clone();
        let mut generated = None;
        if let Some(field) = serial {
            let counter = state.tables.serials.entry(collection.to_string()).or_default();
            match record.get(field).and_then(Value::as_i64) {
                Some(n) => *counter = (*counter).max(n),
                None => {
                    *counter += 1;
                    record.insert(field.to_string(), Value::Int(*counter));
                    generated = Some(Value::Int(*counter));
                }
            }
        }
        state
            .tables
            .rows
            .entry(collection.to_string())
            .or_default()
            .push(record);
        Ok(generated)
    }

    fn trace(&self, op: &str, collection: &str, cond: &Condition) {
        self.statements.fetch_add(1, AtomicOrdering::SeqCst);
        debug!(op, collection, cond = %cond, "memory statement");
    }
}

/// Factory registered under the adapter name `memory`.
pub fn memory_factory() -> AdapterFactory {
    Arc::new(|key: &str, settings: &QuarryConfig| -> Result<Arc<dyn StorageAdapter>> {
        debug!(domain = key, "Creating memory adapter");
        Ok(Arc::new(MemoryAdapter::from_config(settings)?) as Arc<dyn StorageAdapter>)
    })
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn select(&self, query: &Query) -> Result<Vec<Record>> {
        self.trace("select", &query.collection, &query.cond);
        let state = self.state.lock().await;
        let Some(rows) = state.tables.rows.get(&query.collection) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for row in rows {
            if matches(&query.cond, row, &query.alias)? {
                out.push(row.clone());
            }
        }
        drop(state);

        if !query.sort.is_empty() {
            out.sort_by(|a, b| {
                for (name, asc) in &query.sort {
                    let field = field_name(&query.alias, name);
                    let ord = match (a.get(field), b.get(field)) {
                        (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    };
                    let ord = if *asc { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = query.skip.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |n| n as usize);
        let rows = out.into_iter().skip(skip).take(limit);
        Ok(match &query.fields {
            Some(fields) if !fields.is_empty() => rows
                .map(|row| {
                    fields
                        .iter()
                        .map(|f| field_name(&query.alias, f))
                        .filter_map(|f| row.get(f).map(|v| (f.to_string(), v.clone())))
                        .collect()
                })
                .collect(),
            _ => rows.collect(),
        })
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<Option<Value>> {
        let serial = self.serial_fields.get(collection).cloned();
        self.insert_row(collection, record, serial.as_deref()).await
    }

    async fn insert_generated(
        &self,
        collection: &str,
        record: &Record,
        field: &str,
    ) -> Result<Option<Value>> {
        let serial = self.serial_fields.get(collection).map_or(field, String::as_str);
        self.insert_row(collection, record, Some(serial)).await
    }

    async fn update(
        &self,
        collection: &str,
        cond: &Condition,
        values: &WriteSet,
        alias: &Alias,
    ) -> Result<u64> {
        self.trace("update", collection, cond);
        let mut state = self.state.lock().await;
        let Some(rows) = state.tables.rows.get_mut(collection) else {
            return Ok(0);
        };
        let mut updates = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if !matches(cond, row, alias)? {
                continue;
            }
            let mut updated = row.clone();
            for (name, assignment) in values {
                let field = field_name(alias, name).to_string();
                let current = updated.get(&field).cloned().unwrap_or_default();
                let next = match assignment {
                    Assignment::Set(v) => Some(v.clone()),
                    Assignment::Add(v) => current.numeric_add(v),
                    Assignment::Sub(v) => current.numeric_sub(v),
                };
                let next = next.ok_or_else(|| {
                    StorageError::Query(format!(
                        "non-numeric arithmetic on '{collection}.{field}'"
                    ))
                })?;
                updated.insert(field, next);
            }
            updates.push((i, updated));
        }
        let affected = updates.len() as u64;
        for (i, updated) in updates {
            rows[i] = updated;
        }
        Ok(affected)
    }

    async fn delete(&self, collection: &str, cond: &Condition, alias: &Alias) -> Result<u64> {
        self.trace("delete", collection, cond);
        let mut state = self.state.lock().await;
        let Some(rows) = state.tables.rows.get_mut(collection) else {
            return Ok(0);
        };
        let hits = rows
            .iter()
            .map(|row| matches(cond, row, alias))
            .collect::<Result<Vec<_>>>()?;
        let mut hit = hits.iter();
        rows.retain(|_| !hit.next().copied().unwrap_or(false));
        Ok(hits.into_iter().filter(|h| *h).count() as u64)
    }

    async fn begin(&self) -> Result<()> {
        self.trace("begin", "", &Condition::all());
        let mut state = self.state.lock().await;
        let saved = state.tables.clone();
        state.savepoints.push(saved);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.trace("commit", "", &Condition::all());
        let mut state = self.state.lock().await;
        state
            .savepoints
            .pop()
            .map(|_| ())
            .ok_or_else(|| StorageError::Query("commit without an open transaction".into()))
    }

    async fn rollback(&self) -> Result<()> {
        self.trace("rollback", "", &Condition::all());
        let mut state = self.state.lock().await;
        let saved = state
            .savepoints
            .pop()
            .ok_or_else(|| StorageError::Query("rollback without an open transaction".into()))?;
        state.tables = saved;
        Ok(())
    }
}

fn matches(cond: &Condition, row: &Record, alias: &Alias) -> Result<bool> {
    for term in cond.terms() {
        let hit = match term {
            Term::Eq(name, Value::Null) => lookup(row, alias, name).is_null(),
            Term::Eq(name, value) => lookup(row, alias, name).loose_eq(value),
            Term::In(name, values) => {
                let current = lookup(row, alias, name);
                values.iter().any(|v| current.loose_eq(v))
            }
            Term::Cmp(name, op, value) => compare(&lookup(row, alias, name), *op, value),
            Term::Template(text, params) => eval_predicate(text, params, row, alias)?,
            Term::Raw(text) => eval_predicate(text, &[], row, alias)?,
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn lookup(row: &Record, alias: &Alias, name: &str) -> Value {
    row.get(field_name(alias, name)).cloned().unwrap_or_default()
}

fn compare(lhs: &Value, op: CmpOp, rhs: &Value) -> bool {
    match op {
        CmpOp::Eq => lhs.loose_eq(rhs),
        CmpOp::Ne => !lhs.loose_eq(rhs),
        CmpOp::Lt => lhs.compare(rhs) == Some(Ordering::Less),
        CmpOp::Le => matches!(lhs.compare(rhs), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => lhs.compare(rhs) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(lhs.compare(rhs), Some(Ordering::Greater | Ordering::Equal)),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Param,
    Literal(Value),
    Op(CmpOp),
    And,
}

/// Evaluate `operand op operand [AND ...]`, where an operand is a field
/// (`name` or `[name]`), a `?` placeholder, a number or a quoted string.
fn eval_predicate(text: &str, params: &[Value], row: &Record, alias: &Alias) -> Result<bool> {
    let tokens = tokenize(text)?;
    let mut params = params.iter();
    let mut operand = |token: &Token| -> Result<Value> {
        match token {
            Token::Name(name) => Ok(lookup(row, alias, name)),
            Token::Literal(v) => Ok(v.clone()),
            Token::Param => params
                .next()
                .cloned()
                .ok_or_else(|| StorageError::Query(format!("missing parameter in '{text}'"))),
            _ => Err(StorageError::Query(format!("unsupported predicate '{text}'"))),
        }
    };

    let mut result = true;
    for clause in tokens.split(|t| *t == Token::And) {
        let [lhs, Token::Op(op), rhs] = clause else {
            return Err(StorageError::Query(format!("unsupported predicate '{text}'")));
        };
        let lhs = operand(lhs)?;
        let rhs = operand(rhs)?;
        result &= compare(&lhs, *op, &rhs);
    }
    Ok(result)
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let unsupported = || StorageError::Query(format!("unsupported predicate '{text}'"));
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '?' {
            tokens.push(Token::Param);
            i += 1;
        } else if c == '[' {
            let end = chars[i..].iter().position(|&c| c == ']').ok_or_else(unsupported)?;
            tokens.push(Token::Name(chars[i + 1..i + end].iter().collect()));
            i += end + 1;
        } else if c == '\'' {
            let end = chars[i + 1..].iter().position(|&c| c == '\'').ok_or_else(unsupported)?;
            let s: String = chars[i + 1..i + 1 + end].iter().collect();
            tokens.push(Token::Literal(Value::Text(s)));
            i += end + 2;
        } else if "<>=!".contains(c) {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let (op, len) = match CmpOp::parse(&two) {
                Some(op) if two.len() == 2 => (op, 2),
                _ => (CmpOp::parse(&c.to_string()).ok_or_else(unsupported)?, 1),
            };
            tokens.push(Token::Op(op));
            i += len;
        } else if c.is_ascii_digit() || c == '-' {
            let end = chars[i + 1..]
                .iter()
                .position(|c| !(c.is_ascii_digit() || *c == '.'))
                .map_or(chars.len(), |p| i + 1 + p);
            let s: String = chars[i..end].iter().collect();
            let value = match s.parse::<i64>() {
                Ok(n) => Value::Int(n),
                Err(_) => Value::Float(s.parse().map_err(|_| unsupported())?),
            };
            tokens.push(Token::Literal(value));
            i = end;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let end = chars[i..]
                .iter()
                .position(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '.'))
                .map_or(chars.len(), |p| i + p);
            let word: String = chars[i..end].iter().collect();
            tokens.push(if word.eq_ignore_ascii_case("and") {
                Token::And
            } else {
                Token::Name(word)
            });
            i = end;
        } else {
            return Err(unsupported());
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_insert_generates_serial_values() {
        let adapter = MemoryAdapter::new().with_serial("post", "post_id");
        let first = adapter
            .insert("post", &record(&[("title", "a".into())]))
            .await
            .unwrap();
        assert_eq!(first, Some(Value::Int(1)));

        let explicit = adapter
            .insert("post", &record(&[("post_id", Value::Int(10))]))
            .await
            .unwrap();
        assert_eq!(explicit, None);

        let next = adapter.insert("post", &Record::new()).await.unwrap();
        assert_eq!(next, Some(Value::Int(11)));
        assert_eq!(adapter.statement_count(), 3);
    }

    #[tokio::test]
    async fn test_insert_generated_without_configured_serial() {
        let adapter = MemoryAdapter::new();
        let plain = adapter.insert("tag", &record(&[("name", "a".into())])).await.unwrap();
        assert_eq!(plain, None);

        let generated = adapter
            .insert_generated("tag", &record(&[("name", "b".into())]), "id")
            .await
            .unwrap();
        assert_eq!(generated, Some(Value::Int(1)));
        assert_eq!(adapter.rows("tag").await[1].get("id"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_select_filters_sorts_and_pages() {
        let adapter = MemoryAdapter::new();
        for (id, score) in [(1, 30), (2, 10), (3, 20), (4, 40)] {
            adapter
                .seed("t", record(&[("id", Value::Int(id)), ("score", Value::Int(score))]))
                .await;
        }
        let query = Query::new("t", Condition::cmp("score", CmpOp::Ge, 20))
            .sort("score", false)
            .skip(1)
            .limit(1);
        let rows = adapter.select(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(adapter.count(&query).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_template_predicates() {
        let adapter = MemoryAdapter::new();
        adapter
            .seed("t", record(&[("n", Value::Int(5)), ("tag", "x".into())]))
            .await;
        adapter
            .seed("t", record(&[("n", Value::Int(7)), ("tag", "y".into())]))
            .await;

        let cond = Condition::template("[n] > ? AND tag = ?", vec![Value::Int(4), "y".into()]);
        let rows = adapter.select(&Query::new("t", cond)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&Value::Int(7)));

        let raw = Condition::raw("n <= 5 and tag <> 'y'");
        assert_eq!(adapter.select(&Query::new("t", raw)).await.unwrap().len(), 1);

        let bad = Condition::raw("n IN (1, 2)");
        assert!(adapter.select(&Query::new("t", bad)).await.is_err());
    }

    #[tokio::test]
    async fn test_update_applies_deltas_under_guard() {
        let adapter = MemoryAdapter::new();
        adapter
            .seed("t", record(&[("id", Value::Int(1)), ("stock", Value::Int(3))]))
            .await;
        let mut values = WriteSet::new();
        values.insert("stock".into(), Assignment::Sub(Value::Int(2)));
        let guard = Condition::eq("id", 1).and(Term::Cmp("stock".into(), CmpOp::Gt, Value::Int(2)));

        let alias = Alias::new();
        assert_eq!(adapter.update("t", &guard, &values, &alias).await.unwrap(), 1);
        // stock is now 1, the guard no longer holds
        assert_eq!(adapter.update("t", &guard, &values, &alias).await.unwrap(), 0);
        assert_eq!(adapter.rows("t").await[0].get("stock"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_delete_counts_removed_rows() {
        let adapter = MemoryAdapter::new();
        for id in 1..=4 {
            adapter.seed("t", record(&[("id", Value::Int(id))])).await;
        }
        let removed = adapter
            .delete("t", &Condition::is_in("id", [1, 3]), &Alias::new())
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(adapter.rows("t").await.len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_restores_tables() {
        let adapter = MemoryAdapter::new();
        adapter.begin().await.unwrap();
        adapter.insert("t", &record(&[("id", Value::Int(1))])).await.unwrap();
        adapter.rollback().await.unwrap();
        assert!(adapter.rows("t").await.is_empty());

        adapter.begin().await.unwrap();
        adapter.insert("t", &record(&[("id", Value::Int(1))])).await.unwrap();
        adapter.commit().await.unwrap();
        assert_eq!(adapter.rows("t").await.len(), 1);
        assert!(adapter.commit().await.is_err());
    }

    #[test]
    fn test_serial_fields_from_config() {
        let mut settings = QuarryConfig::empty();
        settings.set("serial.post", "post_id");
        let adapter = MemoryAdapter::from_config(&settings).unwrap();
        assert_eq!(adapter.serial_fields.get("post").map(String::as_str), Some("post_id"));
    }
}
