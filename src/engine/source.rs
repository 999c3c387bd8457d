//! Concurrent read entry point

use super::enqueuer::PartitionEnqueuer;
use super::processor::ConcurrentReadProcessor;
use super::reader::PartitionReader;
use super::types::QueueItem;
use crate::config::{ConcurrencyConfig, DEFAULT_MAX_QUEUE_SIZE};
use crate::error::{Error, Result};
use crate::message::{Message, MessageRepository};
use crate::state::State;
use crate::stream::DeclarativeStream;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Ordered output of a read; an `Err` item ends it
pub type MessageStream = BoxStream<'static, Result<Message>>;

/// Reads streams concurrently through one bounded partition queue
#[derive(Debug, Clone)]
pub struct ConcurrentSource {
    concurrency: usize,
    max_queue_size: usize,
    repository: Arc<dyn MessageRepository>,
}

struct ReadLoop {
    queue: mpsc::Receiver<QueueItem>,
    processor: ConcurrentReadProcessor,
    pending: VecDeque<Message>,
}

impl ConcurrentSource {
    /// `repository` must be the one the streams' cursors emit into
    pub fn new(concurrency: usize, repository: Arc<dyn MessageRepository>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            repository,
        }
    }

    /// Build from concurrency settings resolved against the user config
    pub fn from_config(
        config: &ConcurrencyConfig,
        user_config: &serde_json::Value,
        repository: Arc<dyn MessageRepository>,
    ) -> Result<Self> {
        Ok(Self::new(config.resolve(user_config)?, repository).with_max_queue_size(config.max_queue_size))
    }

    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Restore each stream's cursor from a previous sync's state
    pub fn apply_state(streams: &[Arc<DeclarativeStream>], state: &State) -> Result<()> {
        for stream in streams {
            if let Some(stream_state) = state.get_stream(stream.name()) {
                stream
                    .cursor()
                    .set_initial_state(stream_state)
                    .map_err(|e| Error::stream_failed(stream.name(), e))?;
            }
        }
        Ok(())
    }

    /// Read every stream
    ///
    /// Emits STARTED for each stream, then records and checkpoints as
    /// partitions complete, then each stream's final state and COMPLETE.
    /// On failure an error TRACE and INCOMPLETE statuses are emitted before
    /// the error itself. Must be polled inside a tokio runtime.
    pub fn read(&self, streams: Vec<Arc<DeclarativeStream>>) -> MessageStream {
        info!(
            streams = streams.len(),
            concurrency = self.concurrency,
            "Starting concurrent read"
        );
        let (sender, receiver) = mpsc::channel(self.max_queue_size);
        let enqueuer = PartitionEnqueuer::new(sender.clone());
        let processor = ConcurrentReadProcessor::new(
            streams,
            PartitionReader::new(sender),
            self.concurrency,
            Arc::clone(&self.repository),
        );
        let state = ReadLoop {
            queue: receiver,
            processor,
            pending: VecDeque::new(),
        };

        let started = stream::once(async move {
            let mut state = state;
            let messages = state.processor.start(&enqueuer);
            state.pending.extend(messages);
            state
        });

        started
            .flat_map(|state| stream::try_unfold(state, next_message))
            .boxed()
    }
}

async fn next_message(mut state: ReadLoop) -> Result<Option<(Message, ReadLoop)>> {
    loop {
        if let Some(message) = state.pending.pop_front() {
            return Ok(Some((message, state)));
        }
        if let Some(error) = state.processor.take_failure() {
            return Err(error);
        }
        if state.processor.is_done() {
            return Ok(None);
        }

        let messages = tokio::select! {
            item = state.queue.recv() => match item {
                Some(item) => state.processor.handle(item),
                None => return Err(Error::queue("Partition queue closed before every stream completed")),
            },
            Some(exit) = state.processor.join_task() => state.processor.on_task_exit(exit),
        };
        state.pending.extend(messages);
    }
}
