//! Per-partition cursor
//!
//! Keeps one child cursor per partition plus a global watermark (the max
//! over all closed partitions). State layout:
//!
//! ```json
//! {
//!   "use_global_cursor": false,
//!   "states": [{"partition": {"id": 1}, "cursor": {"updated_at": "..."}}],
//!   "state": {"updated_at": "..."},
//!   "lookback_window": 3600,
//!   "parent_state": {"parent": {...}}
//! }
//! ```
//!
//! Beyond [`DEFAULT_MAX_PARTITIONS`] partitions the cursor falls back to the
//! global watermark and stops persisting per-partition states.

use super::concurrent::{ConcurrentCursor, CursorConfig};
use super::types::{merge_state, Cursor, CursorLifecycle};
use crate::error::{Error, Result};
use crate::http::RequestOptions;
use crate::message::{Message, MessageRepository, NoopMessageRepository};
use crate::partition::{PartitionRouter, SliceStream};
use crate::record::Record;
use crate::slice::{partition_key, StreamSlice};
use crate::types::{JsonObject, JsonValue};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Partitions tracked individually before switching to the global cursor
pub const DEFAULT_MAX_PARTITIONS: usize = 10_000;

const STATES_KEY: &str = "states";
const GLOBAL_KEY: &str = "state";

#[derive(Debug)]
struct PartitionEntry {
    partition: JsonObject,
    cursor: Arc<ConcurrentCursor>,
    /// Generated slices not yet closed
    open_slices: usize,
}

#[derive(Debug, Default)]
struct PerPartitionInner {
    partitions: HashMap<String, PartitionEntry>,
    /// Partition keys in creation order
    order: VecDeque<String>,
    /// States restored from the previous sync, by partition key
    initial_states: HashMap<String, JsonValue>,
    global_state: JsonObject,
    /// Parent state when each partition was generated, oldest first
    parent_snapshots: VecDeque<(String, Option<JsonValue>)>,
    use_global_cursor: bool,
    lookback_window: Option<u64>,
    lifecycle: CursorLifecycle,
}

/// Cursor with one watermark per partition
#[derive(Debug)]
pub struct PerPartitionCursor {
    stream_name: String,
    config: CursorConfig,
    router: Arc<dyn PartitionRouter>,
    repository: Arc<dyn MessageRepository>,
    max_partitions: usize,
    inner: Mutex<PerPartitionInner>,
}

impl PerPartitionCursor {
    pub fn new(
        stream_name: impl Into<String>,
        config: CursorConfig,
        router: Arc<dyn PartitionRouter>,
        repository: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            config,
            router,
            repository,
            max_partitions: DEFAULT_MAX_PARTITIONS,
            inner: Mutex::new(PerPartitionInner::default()),
        }
    }

    #[must_use]
    pub fn with_max_partitions(mut self, max_partitions: usize) -> Self {
        self.max_partitions = max_partitions.max(1);
        self
    }

    pub fn use_global_cursor(&self) -> bool {
        self.lock().use_global_cursor
    }

    fn lock(&self) -> MutexGuard<'_, PerPartitionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Child cursor for a partition, created from restored state on first use
    fn child_for(&self, inner: &mut PerPartitionInner, partition: &JsonObject) -> Result<Arc<ConcurrentCursor>> {
        let key = partition_key(partition);
        if let Some(entry) = inner.partitions.get(&key) {
            return Ok(Arc::clone(&entry.cursor));
        }

        let cursor = Arc::new(ConcurrentCursor::new(
            &self.stream_name,
            self.config.clone(),
            Arc::new(NoopMessageRepository),
        ));
        let initial = match inner.initial_states.get(&key) {
            Some(state) if !inner.use_global_cursor => state.clone(),
            _ => JsonValue::Object(inner.global_state.clone()),
        };
        cursor.set_initial_state(&initial)?;

        inner.partitions.insert(
            key.clone(),
            PartitionEntry {
                partition: partition.clone(),
                cursor: Arc::clone(&cursor),
                open_slices: 0,
            },
        );
        inner.order.push_back(key);
        Ok(cursor)
    }

    /// Switch to the global cursor once too many partitions are tracked and
    /// drop the oldest finished partitions
    fn ensure_partition_limit(&self, inner: &mut PerPartitionInner) {
        if inner.partitions.len() <= self.max_partitions {
            return;
        }
        if !inner.use_global_cursor {
            warn!(
                stream = %self.stream_name,
                limit = self.max_partitions,
                "Partition limit reached, switching to the global cursor"
            );
            inner.use_global_cursor = true;
        }
        let partitions = &inner.partitions;
        let finished: Vec<String> = inner
            .order
            .iter()
            .filter(|key| partitions.get(*key).is_some_and(|e| e.open_slices == 0))
            .cloned()
            .collect();
        for key in finished {
            if inner.partitions.len() <= self.max_partitions {
                break;
            }
            inner.partitions.remove(&key);
            inner.order.retain(|k| *k != key);
        }
    }

    /// Slices for one partition: the child cursor's ranges within it
    fn slices_for(&self, partition: &StreamSlice) -> Result<Vec<StreamSlice>> {
        let mut inner = self.lock();
        let child = self.child_for(&mut inner, partition.partition())?;
        let slices = child
            .cursor_slices()
            .into_iter()
            .map(|range| {
                StreamSlice::new(partition.partition().clone(), range)
                    .map(|s| s.with_extra_fields(partition.extra_fields().clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        child.track_slices(&slices);

        let key = partition.partition_key();
        if let Some(entry) = inner.partitions.get_mut(&key) {
            entry.open_slices += slices.len();
        }
        inner
            .parent_snapshots
            .push_back((key, self.router.get_stream_state()));
        self.ensure_partition_limit(&mut inner);
        Ok(slices)
    }

    /// Parent state safe to persist: the state seen when the oldest
    /// unfinished partition was generated, or the current parent state once
    /// every generated partition has closed
    fn parent_state_locked(&self, inner: &PerPartitionInner) -> Option<JsonValue> {
        let pending = inner
            .parent_snapshots
            .iter()
            .find(|(key, _)| !is_finished(inner, key));
        match pending {
            Some((_, snapshot)) => snapshot.clone(),
            None => self.router.get_stream_state(),
        }
    }

    fn state_locked(&self, inner: &PerPartitionInner) -> JsonValue {
        let mut state = JsonObject::new();
        state.insert("use_global_cursor".into(), JsonValue::Bool(inner.use_global_cursor));
        if !inner.use_global_cursor {
            let states: Vec<JsonValue> = inner
                .order
                .iter()
                .filter_map(|key| inner.partitions.get(key))
                .filter_map(|entry| {
                    let cursor = entry.cursor.state();
                    let has_state = cursor.as_object().is_some_and(|c| !c.is_empty());
                    has_state.then(|| {
                        serde_json::json!({"partition": entry.partition, "cursor": cursor})
                    })
                })
                .collect();
            state.insert(STATES_KEY.into(), JsonValue::Array(states));
        }
        if !inner.global_state.is_empty() {
            state.insert(GLOBAL_KEY.into(), JsonValue::Object(inner.global_state.clone()));
        }
        if let Some(lookback) = inner.lookback_window {
            state.insert("lookback_window".into(), JsonValue::from(lookback));
        }
        if let Some(parent_state) = self.parent_state_locked(inner) {
            state.insert("parent_state".into(), parent_state);
        }
        JsonValue::Object(state)
    }

    fn emit_locked(&self, inner: &PerPartitionInner) {
        self.repository
            .emit_message(Message::state(&self.stream_name, self.state_locked(inner)));
    }
}

impl Cursor for PerPartitionCursor {
    fn state(&self) -> JsonValue {
        let inner = self.lock();
        self.state_locked(&inner)
    }

    fn set_initial_state(&self, state: &JsonValue) -> Result<()> {
        let map = match state {
            JsonValue::Null => return Ok(()),
            JsonValue::Object(map) if map.is_empty() => return Ok(()),
            JsonValue::Object(map) => map,
            other => {
                return Err(Error::state(format!(
                    "State of stream '{}' must be an object, got {other}",
                    self.stream_name
                )))
            }
        };

        {
            let mut inner = self.lock();
            inner.use_global_cursor = map
                .get("use_global_cursor")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false);
            inner.lookback_window = map.get("lookback_window").and_then(JsonValue::as_u64);

            match (map.get(STATES_KEY), map.get(GLOBAL_KEY)) {
                (None, None) if !map.contains_key("parent_state") => {
                    // A plain watermark applies to every partition
                    inner.global_state = map.clone();
                }
                (states, global) => {
                    for entry in states.and_then(JsonValue::as_array).into_iter().flatten() {
                        let (Some(JsonValue::Object(partition)), Some(cursor)) =
                            (entry.get("partition"), entry.get("cursor"))
                        else {
                            return Err(Error::state(format!(
                                "Invalid partition state for stream '{}': {entry}",
                                self.stream_name
                            )));
                        };
                        inner
                            .initial_states
                            .insert(partition_key(partition), cursor.clone());
                    }
                    if let Some(JsonValue::Object(global)) = global {
                        inner.global_state = global.clone();
                    }
                }
            }
        }

        self.router.set_initial_state(state)
    }

    fn stream_slices<'a>(&'a self, router: &'a dyn PartitionRouter) -> SliceStream<'a> {
        router
            .stream_slices()
            .map(move |partition| {
                let slices = match partition.and_then(|p| self.slices_for(&p)) {
                    Ok(slices) => slices.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(slices)
            })
            .flatten()
            .boxed()
    }

    fn observe(&self, record: &Record) {
        let key = record
            .associated_slice
            .as_ref()
            .map_or_else(|| "{}".to_string(), StreamSlice::partition_key);
        let child = {
            let mut inner = self.lock();
            inner.lifecycle = inner.lifecycle.observed();
            inner.partitions.get(&key).map(|e| Arc::clone(&e.cursor))
        };
        match child {
            Some(cursor) => cursor.observe(record),
            None => debug!(stream = %self.stream_name, partition = %key, "Record for unknown partition"),
        }
    }

    fn close_partition(&self, slice: &StreamSlice) -> Result<()> {
        let mut inner = self.lock();
        let key = slice.partition_key();
        let Some(entry) = inner.partitions.get_mut(&key) else {
            return Err(Error::state(format!(
                "Closing unknown partition {key} of stream '{}'",
                self.stream_name
            )));
        };
        entry.cursor.close_partition(slice)?;
        entry.open_slices = entry.open_slices.saturating_sub(1);
        let child_state = entry.cursor.state();
        let finished = entry.open_slices == 0;

        if let JsonValue::Object(child_state) = child_state {
            inner.global_state = merge_state(&inner.global_state, &child_state);
        }
        if inner.use_global_cursor && finished {
            inner.partitions.remove(&key);
            inner.order.retain(|k| *k != key);
        }
        while inner
            .parent_snapshots
            .front()
            .is_some_and(|(key, _)| is_finished(&inner, key))
        {
            inner.parent_snapshots.pop_front();
        }
        inner.lifecycle = CursorLifecycle::PartitionClosed;
        self.emit_locked(&inner);
        Ok(())
    }

    fn ensure_at_least_one_state_emitted(&self) {
        let mut inner = self.lock();
        inner.lifecycle = CursorLifecycle::SyncComplete;
        self.emit_locked(&inner);
    }

    fn slice_state(&self, slice: &StreamSlice) -> JsonValue {
        let inner = self.lock();
        match inner.partitions.get(&slice.partition_key()) {
            Some(entry) if !inner.use_global_cursor => entry.cursor.state(),
            _ => JsonValue::Object(inner.global_state.clone()),
        }
    }

    fn should_be_synced(&self, record: &Record) -> bool {
        let key = record
            .associated_slice
            .as_ref()
            .map_or_else(|| "{}".to_string(), StreamSlice::partition_key);
        let child = self
            .lock()
            .partitions
            .get(&key)
            .map(|e| Arc::clone(&e.cursor));
        child.map_or(true, |cursor| cursor.should_be_synced(record))
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

/// A partition with no open slices; dropped partitions were finished
fn is_finished(inner: &PerPartitionInner, key: &str) -> bool {
    inner
        .partitions
        .get(key)
        .map_or(true, |entry| entry.open_slices == 0)
}
