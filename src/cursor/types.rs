//! Cursor trait, lifecycle and the monotonic state merge

use crate::datetime::parse_datetime;
use crate::error::Result;
use crate::http::RequestOptions;
use crate::interpolation::{compare, is_truthy};
use crate::pagination::PaginationStopCondition;
use crate::partition::{PartitionRouter, SliceStream};
use crate::record::Record;
use crate::slice::StreamSlice;
use crate::types::{JsonObject, JsonValue};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Where a cursor is in a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorLifecycle {
    #[default]
    NotStarted,
    PartitionInProgress,
    PartitionClosed,
    SyncComplete,
}

impl CursorLifecycle {
    /// Lifecycle after a record was observed
    pub fn observed(self) -> Self {
        match self {
            Self::SyncComplete => Self::SyncComplete,
            _ => Self::PartitionInProgress,
        }
    }
}

impl fmt::Display for CursorLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::PartitionInProgress => "PARTITION_IN_PROGRESS",
            Self::PartitionClosed => "PARTITION_CLOSED",
            Self::SyncComplete => "SYNC_COMPLETE",
        };
        f.write_str(name)
    }
}

/// Tracks incremental progress of one stream
///
/// `observe` and `close_partition` are called from concurrent workers;
/// implementations serialize state mutation behind one mutex.
pub trait Cursor: Send + Sync + fmt::Debug {
    /// Current state of the stream
    fn state(&self) -> JsonValue;

    /// Restore the state a previous sync ended with
    fn set_initial_state(&self, state: &JsonValue) -> Result<()>;

    /// Slices to read: the router's partitions combined with cursor ranges
    fn stream_slices<'a>(&'a self, router: &'a dyn PartitionRouter) -> SliceStream<'a>;

    /// Record a value read for a partition
    fn observe(&self, record: &Record);

    /// Merge a cleanly finished slice into the state and emit a checkpoint
    fn close_partition(&self, slice: &StreamSlice) -> Result<()>;

    /// Emit the final state of the stream
    fn ensure_at_least_one_state_emitted(&self);

    /// State a slice is read against, exposed to templates as `stream_state`
    fn slice_state(&self, _slice: &StreamSlice) -> JsonValue {
        self.state()
    }

    /// Whether a record lies within the sync boundaries
    fn should_be_synced(&self, _record: &Record) -> bool {
        true
    }

    /// Request options carrying a slice's cursor range
    fn request_options(&self, _slice: &StreamSlice) -> RequestOptions {
        RequestOptions::new()
    }

    fn lifecycle(&self) -> CursorLifecycle;
}

// ============================================================================
// Monotonic merge
// ============================================================================

/// Ordering of two cursor values; datetimes compare as instants
pub fn compare_cursor_values(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    if let (JsonValue::String(l), JsonValue::String(r)) = (left, right) {
        if let (Ok(l), Ok(r)) = (parse_datetime(l), parse_datetime(r)) {
            return Some(l.cmp(&r));
        }
    }
    compare(left, right)
}

/// The larger of two cursor values; `candidate` wins ties and incomparables
pub fn max_cursor_value<'a>(candidate: &'a JsonValue, previous: &'a JsonValue) -> &'a JsonValue {
    match compare_cursor_values(previous, candidate) {
        Some(Ordering::Greater) => previous,
        _ => candidate,
    }
}

/// `merged[f] = max(candidate[f], previous[f])`; falsy candidates never
/// replace a recorded value
pub fn merge_state(previous: &JsonObject, candidate: &JsonObject) -> JsonObject {
    let mut merged = previous.clone();
    for (field, value) in candidate.iter().filter(|(_, v)| is_truthy(v)) {
        let value = match previous.get(field) {
            Some(prev) => max_cursor_value(value, prev).clone(),
            None => value.clone(),
        };
        merged.insert(field.clone(), value);
    }
    merged
}

// ============================================================================
// Pagination stop condition
// ============================================================================

/// Stops pagination at the first record the cursor considers already synced
#[derive(Debug, Clone)]
pub struct CursorStopCondition {
    cursor: Arc<dyn Cursor>,
}

impl CursorStopCondition {
    pub fn new(cursor: Arc<dyn Cursor>) -> Self {
        Self { cursor }
    }
}

impl PaginationStopCondition for CursorStopCondition {
    fn is_met(&self, record: &Record) -> bool {
        !self.cursor.should_be_synced(record)
    }
}
