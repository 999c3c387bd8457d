//! Concurrent read engine
//!
//! Partitions flow through one bounded queue:
//!
//! ```text
//! PartitionEnqueuer (task per stream) --Partition / sentinel / Error-->
//!                                      +-------------------+
//!                                      |  bounded mpsc     | <--Record / PartitionComplete / Error--+
//!                                      +-------------------+                                        |
//!                                               |                                                   |
//!                                   ConcurrentReadProcessor --spawn--> PartitionReader (semaphore-bounded)
//!                                               |
//!                                   records, STATE checkpoints, TRACE statuses
//! ```
//!
//! Producers wait while the queue is full and nothing is dropped. Partitions
//! are closed on the consumer side after their records were dequeued, so a
//! checkpoint never precedes the records it covers. A partition that fails
//! is never closed; the read emits an error TRACE and ends with the error.

mod enqueuer;
mod processor;
mod reader;
mod source;
mod types;

pub use enqueuer::PartitionEnqueuer;
pub use processor::ConcurrentReadProcessor;
pub use reader::PartitionReader;
pub use source::{ConcurrentSource, MessageStream};
pub use types::{Partition, QueueItem, SyncStats};

#[cfg(test)]
mod tests;
