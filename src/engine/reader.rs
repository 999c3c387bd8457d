//! Partition reading

use super::types::{Partition, QueueItem};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

/// Reads one partition and forwards its records to the queue
#[derive(Debug, Clone)]
pub struct PartitionReader {
    queue: mpsc::Sender<QueueItem>,
}

impl PartitionReader {
    pub fn new(queue: mpsc::Sender<QueueItem>) -> Self {
        Self { queue }
    }

    /// Queue every record, then `PartitionComplete`. On failure the error is
    /// queued instead and the partition is never reported complete.
    pub async fn process_partition(&self, partition: Partition) {
        let failure = {
            let mut records = partition.read();
            let mut failure = None;
            while let Some(item) = records.next().await {
                match item {
                    Ok(record) => {
                        if self.queue.send(QueueItem::Record(record)).await.is_err() {
                            debug!(stream = %partition.stream_name(), "Queue closed, abandoning partition");
                            return;
                        }
                    }
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            }
            failure
        };

        let item = match failure {
            Some(error) => QueueItem::Error {
                stream: partition.stream_name().to_string(),
                error,
            },
            None => QueueItem::PartitionComplete(partition),
        };
        if self.queue.send(item).await.is_err() {
            debug!("Queue closed before the partition outcome was sent");
        }
    }
}
