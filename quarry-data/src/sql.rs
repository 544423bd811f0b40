//! SQL statement rendering for relational adapters.
//!
//! ```ignore
//! let renderer = SqlRenderer::new(Dialect::Postgres);
//! let stmt = renderer.select(&Query::new("post", Condition::eq("postId", 1)).alias(alias))?;
//! // SELECT * FROM "post" WHERE "post_id" = $1
//! ```

use crate::adapter::{field_name, Alias, Query};
use crate::condition::{split_template, Assignment, Condition, TemplatePart, Term, WriteSet};
use crate::error::{Result, StorageError};
use crate::value::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Generic SQL using `?` placeholders (default).
    #[default]
    Generic,
    /// SQLite-style `?` placeholders.
    Sqlite,
    /// MySQL-style `?` placeholders with backtick quoting.
    MySql,
    /// Postgres-style `$1, $2, ...` placeholders.
    Postgres,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Generic | Dialect::Sqlite | Dialect::Postgres => '"',
        }
    }

    /// Whether an insert can hand back generated columns with `RETURNING`.
    pub fn supports_returning(self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::Postgres)
    }

    /// Guess the dialect from a connection url scheme.
    pub fn from_url(url: &str) -> Self {
        match url.split(':').next().unwrap_or_default() {
            "postgres" | "postgresql" => Dialect::Postgres,
            "mysql" | "mariadb" => Dialect::MySql,
            "sqlite" => Dialect::Sqlite,
            _ => Dialect::Generic,
        }
    }
}

/// A rendered statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Renders queries, inserts, updates and deletes with quoted, validated
/// identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlRenderer {
    dialect: Dialect,
}

struct Builder<'a> {
    dialect: Dialect,
    alias: &'a Alias,
    sql: String,
    params: Vec<Value>,
}

impl<'a> Builder<'a> {
    fn new(dialect: Dialect, alias: &'a Alias) -> Self {
        Self {
            dialect,
            alias,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    fn ident(&self, name: &str) -> Result<String> {
        quote_identifier(name, self.dialect)
    }

    fn column(&self, name: &str) -> Result<String> {
        self.ident(field_name(self.alias, name))
    }

    fn push_where(&mut self, cond: &Condition) -> Result<()> {
        if cond.is_empty() {
            return Ok(());
        }
        self.sql.push_str(" WHERE ");
        for (i, term) in cond.terms().iter().enumerate() {
            if i > 0 {
                self.sql.push_str(" AND ");
            }
            let clause = self.term(term)?;
            self.sql.push_str(&clause);
        }
        Ok(())
    }

    fn term(&mut self, term: &Term) -> Result<String> {
        Ok(match term {
            Term::Eq(name, Value::Null) => format!("{} IS NULL", self.column(name)?),
            Term::Eq(name, value) => {
                let col = self.column(name)?;
                format!("{col} = {}", self.bind(value.clone()))
            }
            Term::In(_, values) if values.is_empty() => "1 = 0".to_string(),
            Term::In(name, values) => {
                let col = self.column(name)?;
                let placeholders: Vec<_> = values.iter().map(|v| self.bind(v.clone())).collect();
                format!("{col} IN ({})", placeholders.join(", "))
            }
            Term::Cmp(name, op, value) => {
                let col = self.column(name)?;
                format!("{col} {} {}", op.as_sql(), self.bind(value.clone()))
            }
            Term::Template(text, params) => {
                let mut out = String::new();
                let mut params = params.iter();
                for part in split_template(text) {
                    match part {
                        TemplatePart::Text(t) => out.push_str(t),
                        TemplatePart::Name(n) => out.push_str(&self.column(n)?),
                        TemplatePart::Param => {
                            let value = params.next().cloned().ok_or_else(|| {
                                StorageError::Query(format!("missing parameter in '{text}'"))
                            })?;
                            out.push_str(&self.bind(value));
                        }
                    }
                }
                format!("({out})")
            }
            Term::Raw(text) => format!("({text})"),
        })
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

impl SqlRenderer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn select(&self, query: &Query) -> Result<Statement> {
        let mut b = Builder::new(self.dialect, &query.alias);
        let columns = match &query.fields {
            Some(fields) if !fields.is_empty() => fields
                .iter()
                .map(|f| b.column(f))
                .collect::<Result<Vec<_>>>()?
                .join(", "),
            _ => "*".to_string(),
        };
        b.sql = format!("SELECT {columns} FROM {}", b.ident(&query.collection)?);
        b.push_where(&query.cond)?;
        if !query.sort.is_empty() {
            let clauses = query
                .sort
                .iter()
                .map(|(name, asc)| {
                    Ok(format!("{} {}", b.column(name)?, if *asc { "ASC" } else { "DESC" }))
                })
                .collect::<Result<Vec<_>>>()?;
            b.sql.push_str(" ORDER BY ");
            b.sql.push_str(&clauses.join(", "));
        }
        match (query.limit, query.skip) {
            (Some(limit), Some(skip)) => b.sql.push_str(&format!(" LIMIT {limit} OFFSET {skip}")),
            (Some(limit), None) => b.sql.push_str(&format!(" LIMIT {limit}")),
            // OFFSET without LIMIT is not portable
            (None, Some(skip)) => b.sql.push_str(&format!(" LIMIT {} OFFSET {skip}", i64::MAX)),
            (None, None) => {}
        }
        Ok(b.finish())
    }

    pub fn count(&self, query: &Query) -> Result<Statement> {
        let mut b = Builder::new(self.dialect, &query.alias);
        b.sql = format!("SELECT COUNT(*) FROM {}", b.ident(&query.collection)?);
        b.push_where(&query.cond)?;
        Ok(b.finish())
    }

    pub fn insert(&self, collection: &str, record: &Record) -> Result<Statement> {
        let alias = Alias::new();
        let mut b = Builder::new(self.dialect, &alias);
        let table = b.ident(collection)?;
        if record.is_empty() {
            b.sql = format!("INSERT INTO {table} DEFAULT VALUES");
            return Ok(b.finish());
        }
        let mut columns = Vec::with_capacity(record.len());
        let mut placeholders = Vec::with_capacity(record.len());
        for (field, value) in record {
            columns.push(b.ident(field)?);
            placeholders.push(b.bind(value.clone()));
        }
        b.sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        Ok(b.finish())
    }

    /// An insert that reads back the store-generated `field`.
    ///
    /// Dialects without `RETURNING` get the plain insert; the driver then
    /// reports the generated key as the last insert id.
    pub fn insert_returning(&self, collection: &str, record: &Record, field: &str) -> Result<Statement> {
        let mut stmt = self.insert(collection, record)?;
        if self.dialect.supports_returning() {
            let column = quote_identifier(field, self.dialect)?;
            stmt.sql = format!("{} RETURNING {column}", stmt.sql);
        }
        Ok(stmt)
    }

    pub fn update(
        &self,
        collection: &str,
        cond: &Condition,
        values: &WriteSet,
        alias: &Alias,
    ) -> Result<Statement> {
        if values.is_empty() {
            return Err(StorageError::Query(format!(
                "update of '{collection}' has an empty write set"
            )));
        }
        let mut b = Builder::new(self.dialect, alias);
        let table = b.ident(collection)?;
        let mut sets = Vec::with_capacity(values.len());
        for (name, assignment) in values {
            let col = b.column(name)?;
            sets.push(match assignment {
                Assignment::Set(v) => format!("{col} = {}", b.bind(v.clone())),
                Assignment::Add(v) => format!("{col} = {col} + {}", b.bind(v.clone())),
                Assignment::Sub(v) => format!("{col} = {col} - {}", b.bind(v.clone())),
            });
        }
        b.sql = format!("UPDATE {table} SET {}", sets.join(", "));
        b.push_where(cond)?;
        Ok(b.finish())
    }

    pub fn delete(&self, collection: &str, cond: &Condition, alias: &Alias) -> Result<Statement> {
        let mut b = Builder::new(self.dialect, alias);
        b.sql = format!("DELETE FROM {}", b.ident(collection)?);
        b.push_where(cond)?;
        Ok(b.finish())
    }
}

fn quote_identifier(ident: &str, dialect: Dialect) -> Result<String> {
    if !is_valid_identifier(ident) {
        return Err(StorageError::InvalidArgument(format!(
            "invalid identifier: {ident}"
        )));
    }
    let quote = dialect.quote_char();
    Ok(ident
        .split('.')
        .map(|part| format!("{quote}{part}{quote}"))
        .collect::<Vec<_>>()
        .join("."))
}

fn is_valid_identifier(ident: &str) -> bool {
    !ident.is_empty() && ident.split('.').all(is_valid_segment)
}

fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
