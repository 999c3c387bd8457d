//! Partition router implementations
//!
//! Each router handles a specific partitioning strategy.

use super::types::{ParentStream, PartitionRouter, SliceStream};
use crate::error::Result;
use crate::http::{RequestOption, RequestOptions};
use crate::interpolation::InterpolationContext;
use crate::record::Record;
use crate::slice::{partition_key, StreamSlice};
use crate::types::{JsonObject, JsonValue};
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Walk a dotted path (`data.id`) through a JSON value
fn lookup<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.')
        .try_fold(value, |current, part| current.get(part))
        .filter(|v| !v.is_null())
}

// ============================================================================
// Single Partition Router
// ============================================================================

/// Exactly one empty slice; streams without partitions use this
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePartitionRouter;

impl PartitionRouter for SinglePartitionRouter {
    fn stream_slices(&self) -> SliceStream<'_> {
        stream::once(future::ready(Ok(StreamSlice::empty()))).boxed()
    }
}

// ============================================================================
// List Partition Router
// ============================================================================

/// List-based partition router
///
/// Creates one partition per configured value.
#[derive(Debug, Clone)]
pub struct ListPartitionRouter {
    values: Vec<JsonValue>,
    cursor_field: String,
    request_option: Option<RequestOption>,
    config: Arc<JsonValue>,
}

impl ListPartitionRouter {
    /// Create a new list router
    pub fn new(values: Vec<JsonValue>, cursor_field: impl Into<String>, config: Arc<JsonValue>) -> Self {
        Self {
            values,
            cursor_field: cursor_field.into(),
            request_option: None,
            config,
        }
    }

    #[must_use]
    pub fn with_request_option(mut self, option: RequestOption) -> Self {
        self.request_option = Some(option);
        self
    }
}

impl PartitionRouter for ListPartitionRouter {
    fn stream_slices(&self) -> SliceStream<'_> {
        stream::iter(self.values.iter().map(|value| {
            let mut partition = JsonObject::new();
            partition.insert(self.cursor_field.clone(), value.clone());
            Ok(StreamSlice::from_partition(partition))
        }))
        .boxed()
    }

    fn request_options(&self, slice: &StreamSlice) -> RequestOptions {
        let mut options = RequestOptions::new();
        if let (Some(option), Some(value)) = (
            &self.request_option,
            slice.partition().get(&self.cursor_field),
        ) {
            option.inject(value, &mut options, &InterpolationContext::new(&self.config));
        }
        options
    }
}

// ============================================================================
// Substream Partition Router
// ============================================================================

/// How one parent stream maps to child partitions
#[derive(Debug, Clone)]
pub struct ParentStreamConfig {
    pub stream: Arc<dyn ParentStream>,
    /// Dotted path of the value in the parent record
    pub parent_key: String,
    /// Name of the value in the child partition
    pub partition_field: String,
    pub request_option: Option<RequestOption>,
    /// Persist and restore the parent's cursor state with the child
    pub incremental_dependency: bool,
    /// Parent record fields copied into the slice's extra fields
    pub extra_fields: Vec<String>,
}

impl ParentStreamConfig {
    pub fn new(
        stream: Arc<dyn ParentStream>,
        parent_key: impl Into<String>,
        partition_field: impl Into<String>,
    ) -> Self {
        Self {
            stream,
            parent_key: parent_key.into(),
            partition_field: partition_field.into(),
            request_option: None,
            incremental_dependency: false,
            extra_fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_request_option(mut self, option: RequestOption) -> Self {
        self.request_option = Some(option);
        self
    }

    #[must_use]
    pub fn with_incremental_dependency(mut self, enabled: bool) -> Self {
        self.incremental_dependency = enabled;
        self
    }

    #[must_use]
    pub fn with_extra_fields(mut self, fields: Vec<String>) -> Self {
        self.extra_fields = fields;
        self
    }

    /// Child slice for a parent record, `None` when the key is missing
    fn slice_for(&self, record: &Record) -> Option<StreamSlice> {
        let value = lookup(&record.data, &self.parent_key)?;
        let mut partition = JsonObject::new();
        partition.insert(self.partition_field.clone(), value.clone());
        if let Some(parent_slice) = &record.associated_slice {
            if !parent_slice.partition().is_empty() {
                partition.insert(
                    "parent_slice".into(),
                    JsonValue::Object(parent_slice.partition().clone()),
                );
            }
        }

        let extra: JsonObject = self
            .extra_fields
            .iter()
            .filter_map(|field| Some((field.clone(), lookup(&record.data, field)?.clone())))
            .collect();
        Some(StreamSlice::from_partition(partition).with_extra_fields(extra))
    }
}

/// Partitions taken from a list in the config instead of a parent read
#[derive(Debug, Clone)]
pub struct IdsFromConfig {
    /// Dotted path of the list in the config
    pub config_path: String,
    pub partition_field: String,
}

/// Parent/child partition router
///
/// Reads each parent stream in full and yields one deduplicated slice per
/// parent record. When [`IdsFromConfig`] points at a non-empty list, the
/// slices come from that list and no parent is read.
#[derive(Debug, Clone)]
pub struct SubstreamPartitionRouter {
    parents: Vec<ParentStreamConfig>,
    ids_from_config: Option<IdsFromConfig>,
    config: Arc<JsonValue>,
}

impl SubstreamPartitionRouter {
    pub fn new(parents: Vec<ParentStreamConfig>, config: Arc<JsonValue>) -> Self {
        Self {
            parents,
            ids_from_config: None,
            config,
        }
    }

    #[must_use]
    pub fn with_ids_from_config(mut self, ids: IdsFromConfig) -> Self {
        self.ids_from_config = Some(ids);
        self
    }

    pub fn parents(&self) -> &[ParentStreamConfig] {
        &self.parents
    }

    /// Slices from the config override, `None` when it is absent or empty
    fn configured_slices(&self) -> Option<Vec<StreamSlice>> {
        let ids = self.ids_from_config.as_ref()?;
        let values = lookup(&self.config, &ids.config_path)?.as_array()?;
        if values.is_empty() {
            return None;
        }
        Some(
            values
                .iter()
                .map(|value| match value {
                    JsonValue::Object(partition) => StreamSlice::from_partition(partition.clone()),
                    other => {
                        let mut partition = JsonObject::new();
                        partition.insert(ids.partition_field.clone(), other.clone());
                        StreamSlice::from_partition(partition)
                    }
                })
                .collect(),
        )
    }

    fn parent_slices<'a>(&'a self, parent: &'a ParentStreamConfig) -> SliceStream<'a> {
        debug!(parent = parent.stream.name(), "Reading parent stream");
        let mut seen = HashSet::new();
        parent
            .stream
            .read_records()
            .try_filter_map(move |record| {
                let slice = parent
                    .slice_for(&record)
                    .filter(|slice| seen.insert(partition_key(slice.partition())));
                future::ready(Ok(slice))
            })
            .boxed()
    }
}

impl PartitionRouter for SubstreamPartitionRouter {
    fn stream_slices(&self) -> SliceStream<'_> {
        if let Some(slices) = self.configured_slices() {
            info!(count = slices.len(), "Using partition ids from config, skipping parent read");
            return stream::iter(slices.into_iter().map(Ok)).boxed();
        }
        stream::iter(&self.parents)
            .flat_map(|parent| self.parent_slices(parent))
            .boxed()
    }

    fn set_initial_state(&self, stream_state: &JsonValue) -> Result<()> {
        let Some(parent_state) = stream_state.get("parent_state") else {
            return Ok(());
        };
        for parent in self.parents.iter().filter(|p| p.incremental_dependency) {
            if let Some(state) = parent_state.get(parent.stream.name()) {
                parent.stream.set_initial_state(state)?;
            }
        }
        Ok(())
    }

    fn get_stream_state(&self) -> Option<JsonValue> {
        let state: JsonObject = self
            .parents
            .iter()
            .filter(|p| p.incremental_dependency)
            .map(|p| (p.stream.name().to_string(), p.stream.state()))
            .collect();
        (!state.is_empty()).then_some(JsonValue::Object(state))
    }

    fn request_options(&self, slice: &StreamSlice) -> RequestOptions {
        let ctx = InterpolationContext::new(&self.config);
        let mut options = RequestOptions::new();
        for parent in &self.parents {
            if let (Some(option), Some(value)) = (
                &parent.request_option,
                slice.partition().get(&parent.partition_field),
            ) {
                option.inject(value, &mut options, &ctx);
            }
        }
        options
    }
}
