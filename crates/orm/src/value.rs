//! Scalar values flowing through expressions, backends and result rows

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{QueryError, QueryResult};
use crate::hydration::EntityRecord;
use crate::registry::ScalarKind;

/// A single value in a result row or a literal in an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    /// A projected entity with its association state
    Entity(Box<EntityRecord>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Scalar kind of this value; `None` for NULL and entities
    pub fn kind(&self) -> Option<ScalarKind> {
        match self {
            Value::Null | Value::Entity(_) => None,
            Value::Bool(_) => Some(ScalarKind::Bool),
            Value::Int(_) => Some(ScalarKind::Int),
            Value::Float(_) => Some(ScalarKind::Float),
            Value::Text(_) => Some(ScalarKind::Text),
            Value::Uuid(_) => Some(ScalarKind::Uuid),
            Value::Timestamp(_) => Some(ScalarKind::Timestamp),
        }
    }

    /// SQL comparison: `None` when either side is NULL or the kinds are unrelated.
    /// Int and Float compare numerically.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Only TRUE passes a filter; FALSE and unknown (NULL) do not
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn as_entity(&self) -> Option<&EntityRecord> {
        match self {
            Value::Entity(record) => Some(record),
            _ => None,
        }
    }

    /// Convert to JSON
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number(serde_json::Number::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Uuid(u) => JsonValue::String(u.to_string()),
            Value::Timestamp(dt) => JsonValue::String(dt.to_rfc3339()),
            Value::Entity(record) => record.to_json(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Uuid(u) => write!(f, "'{}'", u),
            Value::Timestamp(dt) => write!(f, "'{}'", dt.to_rfc3339()),
            Value::Entity(record) => write!(f, "{}#{}", record.entity(), record.id()),
        }
    }
}

/// Rust types that map one-to-one onto a [`ScalarKind`]
pub trait ScalarType: Sized + Clone + Send + Sync + 'static {
    const KIND: ScalarKind;

    fn into_value(self) -> Value;

    /// Decode a non-entity value; NULL yields `None`
    fn from_value(value: Value) -> QueryResult<Option<Self>>;
}

/// Scalar types accepted by `sum` and `avg`
pub trait Numeric: ScalarType {}

impl Numeric for i64 {}
impl Numeric for f64 {}

fn mismatch<T>(expected: ScalarKind, value: &Value) -> QueryResult<Option<T>> {
    Err(QueryError::Decode(format!(
        "expected {} value, found {}",
        expected, value
    )))
}

macro_rules! scalar_type {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl ScalarType for $ty {
            const KIND: ScalarKind = ScalarKind::$kind;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> QueryResult<Option<Self>> {
                match value {
                    Value::Null => Ok(None),
                    Value::$variant(v) => Ok(Some(v)),
                    other => mismatch(Self::KIND, &other),
                }
            }
        }

        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value)
            }
        }
    };
}

scalar_type!(bool, Bool, Bool);
scalar_type!(i64, Int, Int);
scalar_type!(String, Text, Text);
scalar_type!(Uuid, Uuid, Uuid);
scalar_type!(DateTime<Utc>, Timestamp, Timestamp);

impl ScalarType for f64 {
    const KIND: ScalarKind = ScalarKind::Float;

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> QueryResult<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Float(v) => Ok(Some(v)),
            Value::Int(v) => Ok(Some(v as f64)),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_incomparable() {
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).compare(&Value::Null), None);
    }

    #[test]
    fn test_numeric_cross_comparison() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Float(3.0).compare(&Value::Int(3)), Some(Ordering::Equal));
        assert_eq!(Value::Text("a".into()).compare(&Value::Int(3)), None);
    }

    #[test]
    fn test_scalar_decoding() {
        assert_eq!(i64::from_value(Value::Int(4)).unwrap(), Some(4));
        assert_eq!(String::from_value(Value::Null).unwrap(), None);
        assert_eq!(f64::from_value(Value::Int(25)).unwrap(), Some(25.0));
        assert!(matches!(
            i64::from_value(Value::Text("x".into())),
            Err(QueryError::Decode(_))
        ));
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(Value::from(Some(10)), Value::Int(10));
    }
}
