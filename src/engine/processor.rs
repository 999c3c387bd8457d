//! Consumer side of the partition queue
//!
//! Turns queue items into output messages. This is the only place that
//! closes partitions, so a partition's STATE checkpoint always follows the
//! records read for it.

use super::enqueuer::PartitionEnqueuer;
use super::reader::PartitionReader;
use super::types::{Partition, QueueItem, SyncStats};
use crate::error::Error;
use crate::message::{Message, MessageRepository, StreamStatus};
use crate::record::Record;
use crate::stream::DeclarativeStream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct StreamProgress {
    stream: Arc<DeclarativeStream>,
    generation_completed: bool,
    /// Partitions dequeued but not yet complete
    open_partitions: usize,
    running: bool,
    done: bool,
}

/// Tracks every stream of a read and dispatches partitions to workers
#[derive(Debug)]
pub struct ConcurrentReadProcessor {
    streams: Vec<StreamProgress>,
    index: HashMap<String, usize>,
    repository: Arc<dyn MessageRepository>,
    reader: PartitionReader,
    workers: Arc<Semaphore>,
    tasks: JoinSet<()>,
    failure: Option<Error>,
    stats: SyncStats,
    started_at: Instant,
}

impl ConcurrentReadProcessor {
    pub fn new(
        streams: Vec<Arc<DeclarativeStream>>,
        reader: PartitionReader,
        concurrency: usize,
        repository: Arc<dyn MessageRepository>,
    ) -> Self {
        let index = streams
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name().to_string(), i))
            .collect();
        let streams = streams
            .into_iter()
            .map(|stream| StreamProgress {
                stream,
                generation_completed: false,
                open_partitions: 0,
                running: false,
                done: false,
            })
            .collect();
        Self {
            streams,
            index,
            repository,
            reader,
            workers: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            failure: None,
            stats: SyncStats::new(),
            started_at: Instant::now(),
        }
    }

    /// Spawn one partition generator per stream; STARTED status for each
    pub fn start(&mut self, enqueuer: &PartitionEnqueuer) -> Vec<Message> {
        self.streams
            .iter()
            .map(|progress| {
                let enqueuer = enqueuer.clone();
                let stream = Arc::clone(&progress.stream);
                let name = stream.name().to_string();
                self.tasks
                    .spawn(async move { enqueuer.generate_partitions(stream).await });
                Message::stream_status(name, StreamStatus::Started)
            })
            .collect()
    }

    /// Wait for the next generator or worker task to exit
    pub async fn join_task(&mut self) -> Option<std::result::Result<(), JoinError>> {
        self.tasks.join_next().await
    }

    /// A task exited; a panic fails the read since its partition never completes
    pub fn on_task_exit(&mut self, result: std::result::Result<(), JoinError>) -> Vec<Message> {
        match result {
            Err(e) if e.is_panic() && self.failure.is_none() => {
                self.fail(None, Error::queue(format!("Partition task panicked: {e}")))
            }
            _ => Vec::new(),
        }
    }

    /// All streams finished, or the read failed
    pub fn is_done(&self) -> bool {
        self.failure.is_some() || self.streams.iter().all(|p| p.done)
    }

    /// The error that ended the read, once its messages were handed out
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Messages to emit for one queue item
    pub fn handle(&mut self, item: QueueItem) -> Vec<Message> {
        if self.failure.is_some() {
            return Vec::new();
        }
        match item {
            QueueItem::Partition(partition) => self.on_partition(partition),
            QueueItem::PartitionGenerationCompleted { stream } => {
                self.on_partition_generation_completed(&stream)
            }
            QueueItem::PartitionComplete(partition) => self.on_partition_complete(&partition),
            QueueItem::Record(record) => self.on_record(record),
            QueueItem::Message(message) => {
                let mut messages = vec![message];
                messages.extend(self.repository.consume_queue());
                messages
            }
            QueueItem::Error { stream, error } => self.fail(Some(&stream), error),
        }
    }

    fn progress(&mut self, stream: &str) -> Option<&mut StreamProgress> {
        let i = *self.index.get(stream)?;
        self.streams.get_mut(i)
    }

    fn unknown_stream(&mut self, stream: &str) -> Vec<Message> {
        self.fail(
            Some(stream),
            Error::queue(format!("Item for unknown stream '{stream}'")),
        )
    }

    fn on_partition(&mut self, partition: Partition) -> Vec<Message> {
        let name = partition.stream_name().to_string();
        match self.progress(&name) {
            Some(progress) => progress.open_partitions += 1,
            None => return self.unknown_stream(&name),
        }

        let workers = Arc::clone(&self.workers);
        let reader = self.reader.clone();
        self.tasks.spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            reader.process_partition(partition).await;
        });
        self.repository.consume_queue()
    }

    fn on_partition_generation_completed(&mut self, stream: &str) -> Vec<Message> {
        let finished = match self.progress(stream) {
            Some(progress) => {
                progress.generation_completed = true;
                progress.open_partitions == 0
            }
            None => return self.unknown_stream(stream),
        };
        let mut messages = self.repository.consume_queue();
        if finished {
            messages.extend(self.on_stream_done(stream));
        }
        messages
    }

    fn on_record(&mut self, record: Record) -> Vec<Message> {
        let mut messages = Vec::new();
        match self.progress(&record.stream_name) {
            Some(progress) if !progress.running => {
                progress.running = true;
                messages.push(Message::stream_status(
                    &record.stream_name,
                    StreamStatus::Running,
                ));
            }
            Some(_) => {}
            None => return self.unknown_stream(&record.stream_name),
        }
        self.stats.add_record();
        messages.push(Message::record(record.stream_name, record.data));
        messages.extend(self.repository.consume_queue());
        messages
    }

    fn on_partition_complete(&mut self, partition: &Partition) -> Vec<Message> {
        let name = partition.stream_name().to_string();
        if let Err(error) = partition.close() {
            return self.fail(Some(&name), error);
        }
        self.stats.add_partition();

        let finished = match self.progress(&name) {
            Some(progress) => {
                progress.open_partitions = progress.open_partitions.saturating_sub(1);
                progress.generation_completed && progress.open_partitions == 0
            }
            None => return self.unknown_stream(&name),
        };
        let mut messages = self.repository.consume_queue();
        if finished {
            messages.extend(self.on_stream_done(&name));
        }
        messages
    }

    /// Final state and COMPLETE status of a stream
    fn on_stream_done(&mut self, stream: &str) -> Vec<Message> {
        let Some(progress) = self.progress(stream) else {
            return Vec::new();
        };
        progress.done = true;
        progress.stream.cursor().ensure_at_least_one_state_emitted();
        self.stats.add_stream();
        debug!(stream = %stream, "Stream completed");

        let mut messages = self.repository.consume_queue();
        messages.push(Message::stream_status(stream, StreamStatus::Complete));
        if self.is_done() {
            self.stats.set_duration(self.started_at.elapsed().as_millis() as u64);
            info!(
                records = self.stats.records_emitted,
                partitions = self.stats.partitions_closed,
                streams = self.stats.streams_completed,
                duration_ms = self.stats.duration_ms,
                "Read completed"
            );
        }
        messages
    }

    /// Stop the read: an error trace, then INCOMPLETE for unfinished streams
    fn fail(&mut self, stream: Option<&str>, error: Error) -> Vec<Message> {
        warn!(
            stream = ?stream,
            error = %error,
            retryable = error.is_retryable(),
            "Read failed"
        );
        self.tasks.abort_all();

        let mut messages = self.repository.consume_queue();
        messages.push(Message::error_trace(stream, &error));
        for progress in self.streams.iter_mut().filter(|p| !p.done) {
            progress.done = true;
            messages.push(Message::stream_status(
                progress.stream.name(),
                StreamStatus::Incomplete,
            ));
        }
        self.failure = Some(error);
        messages
    }
}
