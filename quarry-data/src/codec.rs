//! Record ↔ property conversion.

use crate::metadata::{Metadata, PropKind};
use crate::value::{Props, Record, Value};

impl Metadata {
    /// Map property values to storage fields. Properties without a field
    /// (non-persisted or undeclared) are dropped.
    pub fn props_to_fields(&self, props: &Props) -> Record {
        props
            .iter()
            .filter_map(|(name, value)| {
                self.props_to_fields
                    .get(name)
                    .map(|field| (field.clone(), value.clone()))
            })
            .collect()
    }

    /// Map a storage record to property values, coercing each value to the
    /// declared kind. Unknown fields are skipped silently.
    pub fn fields_to_props(&self, record: &Record) -> Props {
        record
            .iter()
            .filter_map(|(field, value)| {
                let name = self.fields_to_props.get(field)?;
                let prop = self.prop(name)?;
                Some((name.clone(), coerce(prop.kind, value)))
            })
            .collect()
    }
}

/// Convert `value` to the representation of `kind`. `Null` stays `Null`.
pub fn coerce(kind: PropKind, value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    match kind {
        PropKind::Int | PropKind::SmallInt | PropKind::Serial => Value::Int(
            value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .or_else(|| leading_int(value))
                .unwrap_or(0),
        ),
        PropKind::Float => Value::Float(value.as_f64().unwrap_or(0.0)),
        PropKind::Bool => Value::Bool(value.truthy()),
        PropKind::String | PropKind::Text => match value {
            Value::Text(_) => value.clone(),
            other => Value::Text(other.key_string()),
        },
    }
}

/// Integer prefix of a text value, e.g. `"12px"` → 12.
fn leading_int(value: &Value) -> Option<i64> {
    let s = value.as_str()?.trim_start();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_integers() {
        assert_eq!(coerce(PropKind::Int, &Value::Text("42".into())), Value::Int(42));
        assert_eq!(coerce(PropKind::Int, &Value::Text("12px".into())), Value::Int(12));
        assert_eq!(coerce(PropKind::SmallInt, &Value::Float(3.9)), Value::Int(3));
        assert_eq!(coerce(PropKind::Serial, &Value::Text("abc".into())), Value::Int(0));
    }

    #[test]
    fn test_coerce_other_kinds() {
        assert_eq!(coerce(PropKind::Float, &Value::Text("1.5".into())), Value::Float(1.5));
        assert_eq!(coerce(PropKind::Bool, &Value::Int(0)), Value::Bool(false));
        assert_eq!(coerce(PropKind::Bool, &Value::Text("yes".into())), Value::Bool(true));
        assert_eq!(coerce(PropKind::String, &Value::Int(7)), Value::Text("7".into()));
        assert_eq!(coerce(PropKind::Text, &Value::Null), Value::Null);
    }
}
