//! Structured queries over a single collection.
//!
//! The engine needs exactly two filter shapes: "array field contains X"
//! (conversations a user belongs to) and "field equals X" (delivery-promotion
//! sweep), plus an optional order-by and limit. Queries never span
//! collections.

use crate::path::CollectionPath;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals the given value. Dotted field paths are allowed.
    Eq(String, Value),
    /// Array field contains the given value.
    ArrayContains(String, Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: CollectionPath,
    filters: Vec<Filter>,
    order_by: Option<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn filter_array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    /// Order results by a field. Documents missing the field are excluded,
    /// matching the semantics of the replicated stores this abstracts.
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn collection_path(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn order(&self) -> Option<(&str, Direction)> {
        self.order_by.as_ref().map(|(f, d)| (f.as_str(), *d))
    }

    pub fn limit_count(&self) -> Option<usize> {
        self.limit
    }

    /// Stable key identifying this query shape, used to deduplicate live
    /// listeners keyed on (query, consumer).
    pub fn key(&self) -> String {
        let mut key = format!("q:{}", self.collection);
        for filter in &self.filters {
            match filter {
                Filter::Eq(f, v) => key.push_str(&format!("|eq:{f}={v:?}")),
                Filter::ArrayContains(f, v) => key.push_str(&format!("|has:{f}={v:?}")),
            }
        }
        if let Some((field, dir)) = self.order() {
            key.push_str(&format!("|ord:{field}:{dir:?}"));
        }
        if let Some(n) = self.limit {
            key.push_str(&format!("|lim:{n}"));
        }
        key
    }
}
