//! Declarative streams
//!
//! A stream ties a partition router, a cursor and a retriever together.
//! The concurrent reader drives it partition by partition; substream routers
//! read it in full through [`ParentStream`].

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::message::MessageRepository;
use crate::partition::{ParentStream, PartitionRouter, RecordStream, SliceStream};
use crate::retriever::SimpleRetriever;
use crate::slice::StreamSlice;
use crate::types::{JsonValue, LogLevel, SyncMode};
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

/// A stream built from a manifest definition
#[derive(Debug)]
pub struct DeclarativeStream {
    name: String,
    primary_key: Vec<String>,
    cursor_field: Option<String>,
    router: Arc<dyn PartitionRouter>,
    cursor: Arc<dyn Cursor>,
    retriever: SimpleRetriever,
    repository: Arc<dyn MessageRepository>,
}

impl DeclarativeStream {
    pub fn new(
        name: impl Into<String>,
        retriever: SimpleRetriever,
        router: Arc<dyn PartitionRouter>,
        cursor: Arc<dyn Cursor>,
        repository: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            name: name.into(),
            primary_key: Vec::new(),
            cursor_field: None,
            router,
            cursor,
            retriever,
            repository,
        }
    }

    #[must_use]
    pub fn with_primary_key(mut self, primary_key: Vec<String>) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Field the incremental cursor tracks
    #[must_use]
    pub fn with_cursor_field(mut self, cursor_field: impl Into<String>) -> Self {
        self.cursor_field = Some(cursor_field.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn cursor_field(&self) -> Option<&str> {
        self.cursor_field.as_deref()
    }

    pub fn cursor(&self) -> &Arc<dyn Cursor> {
        &self.cursor
    }

    pub fn router(&self) -> &Arc<dyn PartitionRouter> {
        &self.router
    }

    /// Sync modes this stream can run in
    pub fn supported_sync_modes(&self) -> Vec<SyncMode> {
        if self.cursor_field.is_some() {
            vec![SyncMode::FullRefresh, SyncMode::Incremental]
        } else {
            vec![SyncMode::FullRefresh]
        }
    }

    /// Every slice to read: router partitions combined with cursor ranges
    pub fn generate_partitions(&self) -> SliceStream<'_> {
        self.cursor.stream_slices(self.router.as_ref())
    }

    /// Records of one slice that lie within the sync boundaries
    pub fn read_partition(&self, slice: StreamSlice) -> RecordStream<'_> {
        self.repository.log_message(LogLevel::Debug, &|| {
            format!("slice:{}", slice.to_value())
        });
        debug!(stream = %self.name, slice = ?slice, "Reading partition");
        let stream_state = self.cursor.slice_state(&slice);
        self.retriever
            .read_records(slice, stream_state)
            .try_filter(|record| future::ready(record.eligible))
            .boxed()
    }
}

impl ParentStream for DeclarativeStream {
    fn name(&self) -> &str {
        &self.name
    }

    /// Reads partitions one after another
    ///
    /// A partition is buffered, its records are yielded, and it is closed
    /// only when the consumer asks for the record after its last one. Parent
    /// state therefore never covers records a child has not seen yet.
    fn read_records(&self) -> RecordStream<'_> {
        self.generate_partitions()
            .and_then(move |slice| async move {
                let records: Vec<_> = self.read_partition(slice.clone()).try_collect().await?;
                let close = stream::once(future::lazy(move |_| {
                    self.cursor.close_partition(&slice).map(|()| None)
                }));
                Ok::<_, Error>(
                    stream::iter(records.into_iter().map(|record| Ok(Some(record)))).chain(close),
                )
            })
            .try_flatten()
            .try_filter_map(|record| future::ready(Ok(record)))
            .boxed()
    }

    fn state(&self) -> JsonValue {
        self.cursor.state()
    }

    fn set_initial_state(&self, state: &JsonValue) -> Result<()> {
        self.cursor.set_initial_state(state)
    }
}
