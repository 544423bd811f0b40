use std::collections::BTreeMap;
use std::fmt;

use crate::value::{Id, Value};

/// Comparison operator of a [`Term::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "=" | "==" => CmpOp::Eq,
            "!=" | "<>" => CmpOp::Ne,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::Le,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::Ge,
            _ => return None,
        })
    }
}

/// One conjunct of a [`Condition`].
///
/// Names in `Eq`, `In` and `Cmp` are property names when the condition goes
/// through a repository; adapters translate them with the query alias map.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// `name = value`, or `name IS NULL` for [`Value::Null`].
    Eq(String, Value),
    /// `name IN (values)`. An empty list matches nothing.
    In(String, Vec<Value>),
    Cmp(String, CmpOp, Value),
    /// Predicate text with positional `?` placeholders; `[name]` marks a
    /// property or field name to be resolved through the alias map.
    Template(String, Vec<Value>),
    /// Pre-built predicate text, passed to the store untouched.
    Raw(String),
}

/// A conjunction of terms. The empty condition matches every record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    terms: Vec<Term>,
}

impl Condition {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(name, value)
    }

    pub fn is_in<V: Into<Value>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::all().and(Term::In(
            name.into(),
            values.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn cmp(name: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Self::all().and(Term::Cmp(name.into(), op, value.into()))
    }

    /// AND-equality over a name → value map.
    pub fn fields<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            terms: pairs
                .into_iter()
                .map(|(k, v)| Term::Eq(k.into(), v.into()))
                .collect(),
        }
    }

    /// A `(template, params)` predicate, e.g. `"[click_count] > ? AND title = ?"`.
    pub fn template(text: impl Into<String>, params: Vec<Value>) -> Self {
        Self::all().and(Term::Template(text.into(), params))
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self::all().and(Term::Raw(text.into()))
    }

    pub fn and(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn and_eq(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(Term::Eq(name.into(), value.into()))
    }

    pub fn merge(mut self, other: Condition) -> Self {
        self.terms.extend(other.terms);
        self
    }

    pub fn push(&mut self, term: Term) {
        self.terms.push(term);
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The value of `name` if this condition consists of exactly equality
    /// terms over `names`, one per name.
    pub(crate) fn exact_equalities(&self, names: &[String]) -> Option<BTreeMap<String, Value>> {
        if self.terms.len() != names.len() {
            return None;
        }
        let mut found = BTreeMap::new();
        for term in &self.terms {
            match term {
                Term::Eq(name, value) if names.contains(name) && !value.is_null() => {
                    if found.insert(name.clone(), value.clone()).is_some() {
                        return None;
                    }
                }
                _ => return None,
            }
        }
        Some(found)
    }
}

impl From<Term> for Condition {
    fn from(term: Term) -> Self {
        Self { terms: vec![term] }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("(all)");
        }
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            match term {
                Term::Eq(name, Value::Null) => write!(f, "{name} IS NULL")?,
                Term::Eq(name, value) => write!(f, "{name} = {value}")?,
                Term::In(name, values) => {
                    let list: Vec<String> = values.iter().map(ToString::to_string).collect();
                    write!(f, "{name} IN ({})", list.join(", "))?
                }
                Term::Cmp(name, op, value) => write!(f, "{name} {} {value}", op.as_sql())?,
                Term::Template(text, params) => {
                    let list: Vec<String> = params.iter().map(ToString::to_string).collect();
                    write!(f, "{text} [{}]", list.join(", "))?
                }
                Term::Raw(text) => f.write_str(text)?,
            }
        }
        Ok(())
    }
}

/// Argument of `find_one`-style lookups: a primary key or a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Id(Id),
    Cond(Condition),
}

impl From<Id> for Lookup {
    fn from(id: Id) -> Self {
        Lookup::Id(id)
    }
}

impl From<Condition> for Lookup {
    fn from(cond: Condition) -> Self {
        Lookup::Cond(cond)
    }
}

macro_rules! impl_lookup_from_scalar {
    ($($t:ty),*) => {
        $(impl From<$t> for Lookup {
            fn from(v: $t) -> Self {
                Lookup::Id(Id::from(v))
            }
        })*
    };
}

impl_lookup_from_scalar!(Value, i32, i64, u32, &str, String);

/// Right-hand side of a field in an UPDATE write set.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set(Value),
    /// `field = field + value`
    Add(Value),
    /// `field = field - value`
    Sub(Value),
}

/// Field → assignment map of an UPDATE statement.
pub type WriteSet = BTreeMap<String, Assignment>;

/// Placeholder-aware splitting of template text.
///
/// Yields literal chunks, `[name]` markers and `?` placeholders in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TemplatePart<'a> {
    Text(&'a str),
    Name(&'a str),
    Param,
}

pub(crate) fn split_template(text: &str) -> Vec<TemplatePart<'_>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'?' => {
                if start < i {
                    parts.push(TemplatePart::Text(&text[start..i]));
                }
                parts.push(TemplatePart::Param);
                start = i + 1;
            }
            b'[' => {
                if let Some(end) = text[i + 1..].find(']') {
                    if start < i {
                        parts.push(TemplatePart::Text(&text[start..i]));
                    }
                    parts.push(TemplatePart::Name(&text[i + 1..i + 1 + end]));
                    i += end + 1;
                    start = i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    if start < text.len() {
        parts.push(TemplatePart::Text(&text[start..]));
    }
    parts
}
