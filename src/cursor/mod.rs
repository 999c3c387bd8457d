//! Incremental cursor module
//!
//! Cursors observe every record read, merge a partition's progress into the
//! stream state when the partition is closed, and emit STATE checkpoints.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted -> PartitionInProgress -> PartitionClosed -> ... -> SyncComplete
//! ```
//!
//! Merging is monotonic: a field keeps the larger of its previous and new
//! value, and empty values never overwrite a recorded watermark.

mod concurrent;
mod final_state;
mod per_partition;
mod types;
mod window;

pub use concurrent::{ConcurrentCursor, CursorConfig};
pub use final_state::{FinalStateCursor, NO_CURSOR_STATE_KEY};
pub use per_partition::{PerPartitionCursor, DEFAULT_MAX_PARTITIONS};
pub use types::{
    compare_cursor_values, max_cursor_value, merge_state, Cursor, CursorLifecycle,
    CursorStopCondition,
};
pub use window::{DatetimeWindow, END_KEY, START_KEY};

#[cfg(test)]
mod tests;
