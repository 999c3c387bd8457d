//! Partition generation

use super::types::{Partition, QueueItem};
use crate::stream::DeclarativeStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Puts the partitions of a stream on the shared queue
///
/// Sending waits while the queue is full; nothing is ever dropped.
#[derive(Debug, Clone)]
pub struct PartitionEnqueuer {
    queue: mpsc::Sender<QueueItem>,
}

impl PartitionEnqueuer {
    pub fn new(queue: mpsc::Sender<QueueItem>) -> Self {
        Self { queue }
    }

    /// Queue every partition of `stream`, then the completion sentinel.
    /// A generation error is queued before the sentinel instead of raised.
    pub async fn generate_partitions(&self, stream: Arc<DeclarativeStream>) {
        let name = stream.name().to_string();
        let mut generated = 0usize;

        let failure = {
            let mut slices = stream.generate_partitions();
            loop {
                match slices.next().await {
                    Some(Ok(slice)) => {
                        let partition = Partition::new(Arc::clone(&stream), slice);
                        if self.queue.send(QueueItem::Partition(partition)).await.is_err() {
                            debug!(stream = %name, "Queue closed, stopping partition generation");
                            return;
                        }
                        generated += 1;
                    }
                    Some(Err(error)) => break Some(error),
                    None => break None,
                }
            }
        };

        if let Some(error) = failure {
            warn!(stream = %name, error = %error, "Partition generation failed");
            let item = QueueItem::Error {
                stream: name.clone(),
                error,
            };
            if self.queue.send(item).await.is_err() {
                return;
            }
        }

        debug!(stream = %name, partitions = generated, "Partition generation completed");
        if self
            .queue
            .send(QueueItem::PartitionGenerationCompleted { stream: name })
            .await
            .is_err()
        {
            debug!("Queue closed before the completion sentinel was sent");
        }
    }
}
