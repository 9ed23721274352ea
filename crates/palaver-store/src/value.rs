//! Field values and write patches.
//!
//! A document is a map from field names to [`Value`]s. Writes are expressed
//! as a [`Patch`]: an ordered map from a (possibly dotted) field path to a
//! [`FieldOp`]. Dotted paths address fields inside nested maps, e.g.
//! `memberMeta.alice.lastOpenedAt`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used for query `order_by`. Values of different variants
    /// sort by a fixed variant rank; within a variant the natural order
    /// applies. Floats compare via total ordering (NaN sorts last).
    pub fn order_cmp(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Text(_) => 4,
            Value::Array(_) => 5,
            Value::Map(_) => 6,
        }
    }

    /// Lossy conversion for handing values to an IPC/UI layer. Timestamps
    /// become RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(x) => serde_json::Value::from(*x),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// One field-level write operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Set the field to the given value.
    Set(Value),
    /// Set the field to the server-assigned commit timestamp.
    ServerTimestamp,
    /// Remove the field (absence, not `false`/`null`, is the canonical
    /// "never set" state downstream).
    Delete,
    /// Append each value not already present. Existing order is kept.
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of each value.
    ArrayRemove(Vec<Value>),
}

/// Whether a `set` merges into the existing document or replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Merge,
    Replace,
}

/// An ordered set of field operations addressed by dotted field paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: BTreeMap<String, FieldOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.insert(field.to_string(), FieldOp::Set(value.into()));
        self
    }

    pub fn server_timestamp(mut self, field: &str) -> Self {
        self.ops.insert(field.to_string(), FieldOp::ServerTimestamp);
        self
    }

    pub fn delete(mut self, field: &str) -> Self {
        self.ops.insert(field.to_string(), FieldOp::Delete);
        self
    }

    pub fn array_union(mut self, field: &str, values: Vec<Value>) -> Self {
        self.ops
            .insert(field.to_string(), FieldOp::ArrayUnion(values));
        self
    }

    pub fn array_remove(mut self, field: &str, values: Vec<Value>) -> Self {
        self.ops
            .insert(field.to_string(), FieldOp::ArrayRemove(values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> impl Iterator<Item = (&str, &FieldOp)> {
        self.ops.iter().map(|(k, v)| (k.as_str(), v))
    }
}
