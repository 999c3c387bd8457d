//! Partition types and traits
//!
//! Defines the core partition abstractions.

use crate::error::Result;
use crate::http::RequestOptions;
use crate::record::Record;
use crate::slice::StreamSlice;
use crate::types::JsonValue;
use futures::stream::BoxStream;

/// Lazy, finite sequence of slices
pub type SliceStream<'a> = BoxStream<'a, Result<StreamSlice>>;

/// Lazy, finite sequence of records
pub type RecordStream<'a> = BoxStream<'a, Result<Record>>;

/// Enumerates the independent partitions of a stream
pub trait PartitionRouter: Send + Sync + std::fmt::Debug {
    /// One slice per partition; only `partition` is populated
    fn stream_slices(&self) -> SliceStream<'_>;

    /// Restore parent stream state from the child's stream state
    fn set_initial_state(&self, _stream_state: &JsonValue) -> Result<()> {
        Ok(())
    }

    /// Parent stream state to persist with the child's state
    fn get_stream_state(&self) -> Option<JsonValue> {
        None
    }

    /// Request options contributed by a slice's partition
    fn request_options(&self, _slice: &StreamSlice) -> RequestOptions {
        RequestOptions::new()
    }
}

/// A stream a substream router can read in full
pub trait ParentStream: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Read every record of every partition, closing partitions as they finish
    fn read_records(&self) -> RecordStream<'_>;

    /// Current cursor state
    fn state(&self) -> JsonValue;

    /// Restore cursor state before reading
    fn set_initial_state(&self, state: &JsonValue) -> Result<()>;
}
