//! Raw and typed value representations
//!
//! [`RawValue`] is what a row source or caller hands in: loosely typed,
//! possibly nested. [`Value`] is what a store receives after coercion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::geometry::Geometry;

/// Handle to one persisted row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowRef {
    pub entity: String,
    pub id: i64,
}

impl RowRef {
    pub fn new(entity: impl Into<String>, id: i64) -> Self {
        Self {
            entity: entity.into(),
            id,
        }
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// Field name to raw value, one per input row
pub type RawRecord = BTreeMap<String, RawValue>;

/// Loosely-typed input value
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Ref(RowRef),
    Record(RawRecord),
    List(Vec<RawValue>),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Null, or text made only of whitespace
    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            RawValue::Null => Json::Null,
            RawValue::Text(s) => Json::String(s.clone()),
            RawValue::Integer(i) => Json::from(*i),
            RawValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            RawValue::Boolean(b) => Json::Bool(*b),
            RawValue::Ref(row) => serde_json::json!({ "entity": row.entity, "id": row.id }),
            RawValue::Record(record) => Json::Object(
                record
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            RawValue::List(items) => Json::Array(items.iter().map(RawValue::to_json).collect()),
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => Ok(()),
            RawValue::Text(s) => f.write_str(s),
            RawValue::Integer(i) => write!(f, "{}", i),
            RawValue::Float(x) => write!(f, "{}", x),
            RawValue::Boolean(b) => write!(f, "{}", b),
            RawValue::Ref(row) => write!(f, "{}", row.id),
            RawValue::Record(_) | RawValue::List(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => RawValue::Null,
            Json::Bool(b) => RawValue::Boolean(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => RawValue::Integer(i),
                None => n.as_f64().map(RawValue::Float).unwrap_or(RawValue::Null),
            },
            Json::String(s) => RawValue::Text(s),
            Json::Array(items) => RawValue::List(items.into_iter().map(RawValue::from).collect()),
            Json::Object(map) => RawValue::Record(
                map.into_iter()
                    .map(|(k, v)| (k, RawValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Integer(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Boolean(value)
    }
}

impl From<RowRef> for RawValue {
    fn from(value: RowRef) -> Self {
        RawValue::Ref(value)
    }
}

impl From<RawRecord> for RawValue {
    fn from(value: RawRecord) -> Self {
        RawValue::Record(value)
    }
}

impl<T: Into<RawValue>> From<Vec<T>> for RawValue {
    fn from(value: Vec<T>) -> Self {
        RawValue::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RawValue::Null)
    }
}

/// Build a [`RawRecord`] from `(name, value)` pairs.
///
/// ```
/// use etl_core::value::{raw_record, RawValue};
///
/// let record = raw_record([("name", RawValue::from("Ana")), ("age", RawValue::from(31_i64))]);
/// assert_eq!(record["name"], RawValue::from("Ana"));
/// ```
pub fn raw_record<K, V, I>(pairs: I) -> RawRecord
where
    K: Into<String>,
    V: Into<RawValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Typed, store-ready value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Spatial(Geometry),
    Ref(RowRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_ref_row(&self) -> Option<&RowRef> {
        match self {
            Value::Ref(row) => Some(row),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Spatial(g) => write!(f, "{}", g),
            Value::Ref(row) => write!(f, "{}", row),
        }
    }
}

/// Coerced column values of one record; relationship lists live in
/// [`PendingRelations`] instead.
pub type ResolvedRecord = BTreeMap<String, Value>;

/// To-many relationship name to the rows that must be attached once the
/// owner exists
pub type PendingRelations = BTreeMap<String, Vec<RowRef>>;
