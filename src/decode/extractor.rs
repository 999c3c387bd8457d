//! Record extraction and selection

use super::types::RecordExtractor;
use crate::error::{Error, Result};
use crate::interpolation::{InterpolatedBoolean, InterpolatedString, InterpolationContext};
use crate::types::JsonValue;
use std::sync::Arc;

// ============================================================================
// DpathExtractor
// ============================================================================

/// Extracts records at a path of field names. `*` matches every element
/// of an array or every value of an object at that level.
#[derive(Debug, Clone, Default)]
pub struct DpathExtractor {
    field_path: Vec<String>,
}

impl DpathExtractor {
    /// Resolve the (interpolated) path against config and parameters
    pub fn new(
        field_path: &[String],
        config: &JsonValue,
        parameters: &JsonValue,
    ) -> Result<Self> {
        let ctx = InterpolationContext::new(config).with_parameters(parameters);
        let field_path = field_path
            .iter()
            .map(|p| Ok(InterpolatedString::new(p.as_str())?.eval_string(&ctx)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { field_path })
    }

    /// Path segments after interpolation
    pub fn field_path(&self) -> &[String] {
        &self.field_path
    }

    fn to_jsonpath(&self) -> String {
        let mut path = String::from("$");
        for segment in &self.field_path {
            if segment == "*" {
                path.push_str("[*]");
            } else {
                path.push_str(&format!("['{}']", segment.replace('\'', "\\'")));
            }
        }
        path
    }
}

impl RecordExtractor for DpathExtractor {
    fn extract_records(&self, decoded: &JsonValue) -> Result<Vec<JsonValue>> {
        if self.field_path.is_empty() {
            return Ok(as_records(Some(decoded.clone())));
        }
        if self.field_path.iter().any(|p| p == "*") {
            return extract_with_jsonpath(decoded, &self.to_jsonpath());
        }
        Ok(as_records(extract_simple_path(decoded, &self.field_path).cloned()))
    }
}

/// Arrays are records, a non-empty value is one record, anything else none
fn as_records(value: Option<JsonValue>) -> Vec<JsonValue> {
    match value {
        Some(JsonValue::Array(items)) => items,
        Some(JsonValue::Null) | None => vec![],
        Some(JsonValue::Object(map)) if map.is_empty() => vec![],
        Some(other) => vec![other],
    }
}

/// Walk field names, indexing arrays by position
fn extract_simple_path<'v>(value: &'v JsonValue, path: &[String]) -> Option<&'v JsonValue> {
    let mut current = value;
    for part in path {
        current = match current {
            JsonValue::Object(map) => map.get(part)?,
            JsonValue::Array(items) => {
                let index = part.parse::<i64>().ok()?;
                let len = items.len() as i64;
                let index = if index < 0 { len + index } else { index };
                items.get(usize::try_from(index).ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Extract records using jsonpath-rust
fn extract_with_jsonpath(value: &JsonValue, path: &str) -> Result<Vec<JsonValue>> {
    use jsonpath_rust::JsonPath;

    let jp = JsonPath::try_from(path).map_err(|e| Error::JsonPath {
        message: format!("Invalid JSONPath: {e}"),
    })?;

    match jp.find(value) {
        JsonValue::Array(found) => Ok(found
            .into_iter()
            .flat_map(|v| match v {
                JsonValue::Array(items) => items,
                JsonValue::Null => vec![],
                other => vec![other],
            })
            .collect()),
        JsonValue::Null => Ok(vec![]),
        other => Ok(vec![other]),
    }
}

// ============================================================================
// RecordFilter / RecordSelector
// ============================================================================

/// Keeps records for which `condition` holds
#[derive(Debug, Clone)]
pub struct RecordFilter {
    condition: InterpolatedBoolean,
}

impl RecordFilter {
    pub fn new(condition: impl Into<String>) -> Result<Self> {
        Ok(Self {
            condition: InterpolatedBoolean::new(condition)?,
        })
    }

    /// Whether `record` passes; `ctx` carries config, state, slice and page token
    pub fn keep(&self, record: &JsonValue, ctx: &InterpolationContext<'_>) -> bool {
        self.condition.eval(&ctx.with_record(record))
    }
}

/// Extracts records from a decoded document and filters them
#[derive(Debug, Clone)]
pub struct RecordSelector {
    extractor: Arc<dyn RecordExtractor>,
    filter: Option<RecordFilter>,
}

impl RecordSelector {
    pub fn new(extractor: Arc<dyn RecordExtractor>) -> Self {
        Self {
            extractor,
            filter: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Extract, then drop records rejected by the filter
    pub fn select_records(
        &self,
        decoded: &JsonValue,
        ctx: &InterpolationContext<'_>,
    ) -> Result<Vec<JsonValue>> {
        let records = self.extractor.extract_records(decoded)?;
        Ok(match &self.filter {
            Some(filter) => records
                .into_iter()
                .filter(|record| filter.keep(record, ctx))
                .collect(),
            None => records,
        })
    }
}
