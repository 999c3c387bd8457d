//! Global watermark cursor

use super::types::{compare_cursor_values, merge_state, Cursor, CursorLifecycle};
use super::window::DatetimeWindow;
use crate::error::{Error, Result};
use crate::http::RequestOptions;
use crate::interpolation::is_truthy;
use crate::message::{Message, MessageRepository};
use crate::partition::{PartitionRouter, SliceStream};
use crate::record::Record;
use crate::slice::{partition_key, StreamSlice};
use crate::types::{JsonObject, JsonValue};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// What a cursor tracks and how it slices time
#[derive(Debug, Clone)]
pub struct CursorConfig {
    /// Record field holding the cursor value
    pub cursor_field: String,
    pub window: Option<DatetimeWindow>,
}

impl CursorConfig {
    pub fn new(cursor_field: impl Into<String>) -> Self {
        Self {
            cursor_field: cursor_field.into(),
            window: None,
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: DatetimeWindow) -> Self {
        self.window = Some(window);
        self
    }
}

/// Identity of the slice a record was read for
pub(crate) fn slice_key(slice: Option<&StreamSlice>) -> String {
    slice.map_or_else(|| "{}".to_string(), |s| partition_key(&s.to_object()))
}

#[derive(Debug, Default)]
struct CursorInner {
    state: JsonObject,
    /// Most recent value observed per open slice
    most_recent: HashMap<String, JsonValue>,
    /// Watermark the sync started from
    sync_start: Option<JsonValue>,
    /// Window slices in generation order whose values are not merged yet
    pending: VecDeque<String>,
    /// Closed window slices waiting on an earlier open one
    closed: HashMap<String, Option<JsonValue>>,
    lifecycle: CursorLifecycle,
}

/// Cursor keeping one watermark for the whole stream
#[derive(Debug)]
pub struct ConcurrentCursor {
    stream_name: String,
    config: CursorConfig,
    repository: Arc<dyn MessageRepository>,
    inner: Mutex<CursorInner>,
}

impl ConcurrentCursor {
    pub fn new(
        stream_name: impl Into<String>,
        config: CursorConfig,
        repository: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            config,
            repository,
            inner: Mutex::new(CursorInner::default()),
        }
    }

    pub fn cursor_field(&self) -> &str {
        &self.config.cursor_field
    }

    fn lock(&self) -> MutexGuard<'_, CursorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cursor ranges to read; a single empty range without a window
    pub fn cursor_slices(&self) -> Vec<JsonObject> {
        match self.config.window {
            Some(ref window) => {
                let sync_start = self.lock().sync_start.clone();
                window.slices(sync_start.as_ref(), Utc::now())
            }
            None => vec![JsonObject::new()],
        }
    }

    /// Register generated window slices
    ///
    /// The watermark then only moves over windows closed in generation
    /// order, so a later window finishing first never hides earlier ones.
    pub(crate) fn track_slices(&self, slices: &[StreamSlice]) {
        if self.config.window.is_none() {
            return;
        }
        let mut inner = self.lock();
        inner
            .pending
            .extend(slices.iter().map(|slice| slice_key(Some(slice))));
    }

    fn advance(&self, state: &mut JsonObject, value: Option<JsonValue>) {
        if let Some(value) = value {
            let mut candidate = JsonObject::new();
            candidate.insert(self.config.cursor_field.clone(), value);
            *state = merge_state(state, &candidate);
        }
    }

    fn emit(&self, state: &JsonObject) {
        self.repository
            .emit_message(Message::state(&self.stream_name, JsonValue::Object(state.clone())));
    }
}

impl Cursor for ConcurrentCursor {
    fn state(&self) -> JsonValue {
        JsonValue::Object(self.lock().state.clone())
    }

    fn set_initial_state(&self, state: &JsonValue) -> Result<()> {
        let mut inner = self.lock();
        match state {
            JsonValue::Null => {
                inner.state.clear();
                inner.sync_start = None;
            }
            JsonValue::Object(map) => {
                inner.state = map.clone();
                inner.sync_start = map.get(&self.config.cursor_field).cloned();
            }
            other => {
                return Err(Error::state(format!(
                    "State of stream '{}' must be an object, got {other}",
                    self.stream_name
                )))
            }
        }
        Ok(())
    }

    fn stream_slices<'a>(&'a self, router: &'a dyn PartitionRouter) -> SliceStream<'a> {
        if self.config.window.is_none() {
            return router.stream_slices();
        }
        let windows = self.cursor_slices();
        router
            .stream_slices()
            .map_ok(move |partition| {
                let slices = windows
                    .iter()
                    .map(|window| {
                        StreamSlice::new(partition.partition().clone(), window.clone())
                            .map(|s| s.with_extra_fields(partition.extra_fields().clone()))
                    })
                    .collect::<Result<Vec<_>>>();
                let items: Vec<Result<StreamSlice>> = match slices {
                    Ok(slices) => {
                        self.track_slices(&slices);
                        slices.into_iter().map(Ok).collect()
                    }
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .try_flatten()
            .boxed()
    }

    fn observe(&self, record: &Record) {
        let Some(value) = record.get(&self.config.cursor_field).filter(|v| is_truthy(v)) else {
            return;
        };
        let key = slice_key(record.associated_slice.as_ref());
        let mut inner = self.lock();
        inner.lifecycle = inner.lifecycle.observed();
        let newer = inner
            .most_recent
            .get(&key)
            .map_or(true, |current| {
                compare_cursor_values(value, current) == Some(Ordering::Greater)
            });
        if newer {
            inner.most_recent.insert(key, value.clone());
        }
    }

    fn close_partition(&self, slice: &StreamSlice) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let key = slice_key(Some(slice));
        let value = inner.most_recent.remove(&key);
        if inner.pending.contains(&key) {
            inner.closed.insert(key, value);
            while let Some(front) = inner.pending.front() {
                let Some(value) = inner.closed.remove(front) else {
                    break;
                };
                inner.pending.pop_front();
                self.advance(&mut inner.state, value);
            }
        } else {
            self.advance(&mut inner.state, value);
        }
        inner.lifecycle = CursorLifecycle::PartitionClosed;
        debug!(stream = %self.stream_name, slice = ?slice, "Closed partition");
        self.emit(&inner.state);
        Ok(())
    }

    fn ensure_at_least_one_state_emitted(&self) {
        let mut inner = self.lock();
        inner.lifecycle = CursorLifecycle::SyncComplete;
        self.emit(&inner.state);
    }

    fn should_be_synced(&self, record: &Record) -> bool {
        let Some(value) = record.get(&self.config.cursor_field) else {
            return true;
        };
        let sync_start = self.lock().sync_start.clone();
        match self.config.window {
            Some(ref window) => window.contains(value, window.effective_start(sync_start.as_ref())),
            None => sync_start.map_or(true, |start| {
                compare_cursor_values(value, &start) != Some(Ordering::Less)
            }),
        }
    }

    fn request_options(&self, slice: &StreamSlice) -> RequestOptions {
        self.config
            .window
            .as_ref()
            .map(|w| w.request_options(slice))
            .unwrap_or_default()
    }

    fn lifecycle(&self) -> CursorLifecycle {
        self.lock().lifecycle
    }
}
