//! Engine types
//!
//! Queue items exchanged between the partition generators, the workers and
//! the reader, plus read statistics.

use crate::error::{Error, Result};
use crate::message::Message;
use crate::partition::RecordStream;
use crate::record::Record;
use crate::slice::StreamSlice;
use crate::stream::DeclarativeStream;
use std::sync::Arc;

/// A slice of a stream, read exactly once by a worker
#[derive(Debug, Clone)]
pub struct Partition {
    stream: Arc<DeclarativeStream>,
    slice: StreamSlice,
}

impl Partition {
    pub fn new(stream: Arc<DeclarativeStream>, slice: StreamSlice) -> Self {
        Self { stream, slice }
    }

    pub fn stream(&self) -> &Arc<DeclarativeStream> {
        &self.stream
    }

    pub fn stream_name(&self) -> &str {
        self.stream.name()
    }

    pub fn slice(&self) -> &StreamSlice {
        &self.slice
    }

    /// Records of this partition within the sync boundaries
    pub fn read(&self) -> RecordStream<'_> {
        self.stream.read_partition(self.slice.clone())
    }

    /// Merge the partition into its stream's cursor state
    pub fn close(&self) -> Result<()> {
        self.stream.cursor().close_partition(&self.slice)
    }
}

/// Everything that travels through the partition queue
#[derive(Debug)]
pub enum QueueItem {
    /// A partition to hand to a worker
    Partition(Partition),
    /// No more partitions will be generated for this stream
    PartitionGenerationCompleted { stream: String },
    /// Every record of this partition has been queued
    PartitionComplete(Partition),
    /// Generating or reading partitions of a stream failed
    Error { stream: String, error: Error },
    Record(Record),
    Message(Message),
}

/// Statistics from a read
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Records emitted
    pub records_emitted: usize,
    /// Partitions read to completion and closed
    pub partitions_closed: usize,
    /// Streams that completed
    pub streams_completed: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self) {
        self.records_emitted += 1;
    }

    pub fn add_partition(&mut self) {
        self.partitions_closed += 1;
    }

    pub fn add_stream(&mut self) {
        self.streams_completed += 1;
    }

    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }
}
