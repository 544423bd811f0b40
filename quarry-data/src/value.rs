use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A scalar stored in a record field or an entity property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Raw storage record, keyed by field name.
pub type Record = BTreeMap<String, Value>;

/// Entity state, keyed by property name.
pub type Props = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Loose truthiness: `0`, `0.0`, `""`, `"0"` and `Null` are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Text(s) => !(s.is_empty() || s == "0"),
        }
    }

    /// The string used to build identity and cache keys.
    pub fn key_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => "0".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// Compare two values the way a SQL engine would: numbers across
    /// int/float, text lexicographically. `Null` and mixed kinds do not
    /// compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Text(_), _) | (_, Value::Text(_)) => None,
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    /// Equality used by condition matching (`1 == 1.0`, `true == 1`).
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Text(_), _) | (_, Value::Text(_)) => {
                self.key_string() == other.key_string()
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// `self - other` for numeric values, `Null` counting as zero.
    pub fn numeric_sub(&self, other: &Value) -> Option<Value> {
        match (self.or_zero(), other.or_zero()) {
            (Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_sub(b))),
            (a, b) => Some(Value::Float(a.as_f64()? - b.as_f64()?)),
        }
    }

    /// `self + other` for numeric values, `Null` counting as zero.
    pub fn numeric_add(&self, other: &Value) -> Option<Value> {
        match (self.or_zero(), other.or_zero()) {
            (Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_add(b))),
            (a, b) => Some(Value::Float(a.as_f64()? + b.as_f64()?)),
        }
    }

    fn or_zero(&self) -> Value {
        match self {
            Value::Null => Value::Int(0),
            Value::Bool(v) => Value::Int(i64::from(*v)),
            Value::Text(s) => match s.trim().parse::<i64>() {
                Ok(v) => Value::Int(v),
                Err(_) => s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Primary key of an entity: a single value or named components.
#[derive(Debug, Clone, PartialEq)]
pub enum Id {
    Scalar(Value),
    Composite(BTreeMap<String, Value>),
}

impl Id {
    pub fn composite<K, V>(parts: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Id::Composite(
            parts
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Id::Composite(_))
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Id::Scalar(v) => Some(v),
            Id::Composite(_) => None,
        }
    }

    /// Order-independent key string.
    ///
    /// Composite components are sorted by name and url-encoded as
    /// `name=value&...`; a scalar id is the plain string form of its value.
    pub fn canonical(&self) -> String {
        match self {
            Id::Scalar(v) => v.key_string(),
            Id::Composite(parts) => {
                let mut ser = form_urlencoded::Serializer::new(String::new());
                // BTreeMap iterates in ascending key order
                for (name, value) in parts {
                    ser.append_pair(name, &value.key_string());
                }
                ser.finish()
            }
        }
    }

    /// Key scoped to an entity type: `Type.canonical`.
    pub fn cache_key(&self, type_name: &str) -> String {
        format!("{type_name}.{}", self.canonical())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

macro_rules! impl_scalar_id {
    ($($t:ty),*) => {
        $(impl From<$t> for Id {
            fn from(v: $t) -> Self {
                Id::Scalar(v.into())
            }
        })*
    };
}

impl_scalar_id!(Value, i32, i64, u32, &str, String);
