//! Stream slices
//!
//! A slice is the unit of work for one partition read: the partition
//! coordinates (e.g. a parent id) plus the cursor window (e.g. a date range).
//! The two halves never share keys and a slice never changes once built.

use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use serde::{Serialize, Serializer};
use std::fmt;

/// Immutable slice made of a partition part and a cursor part
#[derive(Clone, Default)]
pub struct StreamSlice {
    partition: JsonObject,
    cursor_slice: JsonObject,
    extra_fields: JsonObject,
}

impl StreamSlice {
    /// Build a slice, rejecting keys present in both halves
    pub fn new(partition: JsonObject, cursor_slice: JsonObject) -> Result<Self> {
        let overlap: Vec<&str> = partition
            .keys()
            .filter(|k| cursor_slice.contains_key(*k))
            .map(String::as_str)
            .collect();

        if !overlap.is_empty() {
            return Err(Error::slice(format!(
                "partition and cursor_slice share keys: {}",
                overlap.join(", ")
            )));
        }

        Ok(Self {
            partition,
            cursor_slice,
            extra_fields: JsonObject::new(),
        })
    }

    /// A slice with only partition coordinates
    pub fn from_partition(partition: JsonObject) -> Self {
        Self {
            partition,
            ..Default::default()
        }
    }

    /// A slice with only a cursor window
    pub fn from_cursor_slice(cursor_slice: JsonObject) -> Self {
        Self {
            cursor_slice,
            ..Default::default()
        }
    }

    /// The empty slice used by unpartitioned, non-incremental streams
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attach fields that travel with the slice without affecting equality
    #[must_use]
    pub fn with_extra_fields(mut self, extra_fields: JsonObject) -> Self {
        self.extra_fields = extra_fields;
        self
    }

    pub fn partition(&self) -> &JsonObject {
        &self.partition
    }

    pub fn cursor_slice(&self) -> &JsonObject {
        &self.cursor_slice
    }

    pub fn extra_fields(&self) -> &JsonObject {
        &self.extra_fields
    }

    /// Look up a key in the combined view
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.partition
            .get(key)
            .or_else(|| self.cursor_slice.get(key))
    }

    /// Number of keys in the combined view
    pub fn len(&self) -> usize {
        self.partition.len() + self.cursor_slice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partition.is_empty() && self.cursor_slice.is_empty()
    }

    /// Iterate the combined view, partition keys first
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.partition.iter().chain(self.cursor_slice.iter())
    }

    /// Combined view as a JSON object
    pub fn to_object(&self) -> JsonObject {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Combined view as a JSON value
    pub fn to_value(&self) -> JsonValue {
        JsonValue::Object(self.to_object())
    }

    /// Stable identity of the partition half, independent of key order
    pub fn partition_key(&self) -> String {
        partition_key(&self.partition)
    }
}

impl PartialEq for StreamSlice {
    fn eq(&self, other: &Self) -> bool {
        self.partition == other.partition && self.cursor_slice == other.cursor_slice
    }
}

impl Eq for StreamSlice {}

impl fmt::Debug for StreamSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSlice")
            .field("partition", &self.partition)
            .field("cursor_slice", &self.cursor_slice)
            .finish_non_exhaustive()
    }
}

impl Serialize for StreamSlice {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_object().serialize(serializer)
    }
}

/// Canonical string form of a partition mapping (keys sorted recursively)
pub fn partition_key(partition: &JsonObject) -> String {
    let mut out = String::new();
    write_canonical(&JsonValue::Object(partition.clone()), &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
