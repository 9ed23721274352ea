//! Point-in-time view of a single document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::path::DocPath;
use crate::value::Value;

/// A document as read from the store: its path, fields, and the server time
/// of the last write that touched it.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    path: DocPath,
    fields: BTreeMap<String, Value>,
    update_time: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(
        path: DocPath,
        fields: BTreeMap<String, Value>,
        update_time: DateTime<Utc>,
    ) -> Self {
        Self {
            path,
            fields,
            update_time,
        }
    }

    pub fn path(&self) -> &DocPath {
        &self.path
    }

    /// The document id (final path segment).
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn update_time(&self) -> DateTime<Utc> {
        self.update_time
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Look up a field. Dotted paths descend into nested maps:
    /// `get("memberMeta.alice.lastOpenedAt")`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        lookup(&self.fields, field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field).and_then(Value::as_timestamp)
    }

    pub fn get_array(&self, field: &str) -> Option<&[Value]> {
        self.get(field).and_then(Value::as_array)
    }

    pub fn get_map(&self, field: &str) -> Option<&BTreeMap<String, Value>> {
        self.get(field).and_then(Value::as_map)
    }

    /// The string items of an array field, ignoring non-string entries.
    pub fn get_str_array(&self, field: &str) -> Vec<String> {
        self.get_array(field)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Dotted-path lookup over a field map.
pub(crate) fn lookup<'a>(fields: &'a BTreeMap<String, Value>, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_map()?.get(part)?;
    }
    Some(current)
}
