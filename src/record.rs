//! Records produced by a retriever

use crate::slice::StreamSlice;
use crate::types::JsonValue;

/// One extracted record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Record data (a JSON object in practice)
    pub data: JsonValue,
    /// Stream the record belongs to
    pub stream_name: String,
    /// Slice the record was read for
    pub associated_slice: Option<StreamSlice>,
    /// False when the cursor reports the record outside the sync boundaries
    pub eligible: bool,
}

impl Record {
    /// Create a record read for the given slice
    pub fn new(stream_name: impl Into<String>, data: JsonValue, slice: Option<StreamSlice>) -> Self {
        Self {
            data,
            stream_name: stream_name.into(),
            associated_slice: slice,
            eligible: true,
        }
    }

    /// Top-level field lookup
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.data.get(field)
    }

    /// Partition key of the associated slice, `{}` when there is none
    pub fn partition_key(&self) -> String {
        self.associated_slice
            .as_ref()
            .map_or_else(|| "{}".to_string(), StreamSlice::partition_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_defaults_to_eligible() {
        let record = Record::new("users", json!({"id": 1}), None);
        assert!(record.eligible);
        assert_eq!(record.get("id"), Some(&json!(1)));
        assert_eq!(record.partition_key(), "{}");
    }

    #[test]
    fn test_record_partition_key_follows_slice() {
        let slice = StreamSlice::from_partition(
            json!({"survey_id": "s1"}).as_object().cloned().unwrap(),
        );
        let record = Record::new("responses", json!({"id": 1}), Some(slice));
        assert_eq!(record.partition_key(), r#"{"survey_id":"s1"}"#);
    }
}
