//! Cursor for full-refresh streams

use super::types::{Cursor, CursorLifecycle};
use crate::error::Result;
use crate::message::{Message, MessageRepository};
use crate::partition::{PartitionRouter, SliceStream};
use crate::record::Record;
use crate::slice::StreamSlice;
use crate::types::{JsonObject, JsonValue};
use std::sync::{Arc, Mutex, PoisonError};

/// Marker state emitted once a full-refresh stream finishes
pub const NO_CURSOR_STATE_KEY: &str = "__ab_no_cursor_state_message";

/// Tracks nothing per partition; emits a marker state at the end
#[derive(Debug)]
pub struct FinalStateCursor {
    stream_name: String,
    repository: Arc<dyn MessageRepository>,
    lifecycle: Mutex<CursorLifecycle>,
}

impl FinalStateCursor {
    pub fn new(stream_name: impl Into<String>, repository: Arc<dyn MessageRepository>) -> Self {
        Self {
            stream_name: stream_name.into(),
            repository,
            lifecycle: Mutex::new(CursorLifecycle::NotStarted),
        }
    }

    fn set_lifecycle(&self, next: impl FnOnce(CursorLifecycle) -> CursorLifecycle) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        *lifecycle = next(*lifecycle);
    }
}

impl Cursor for FinalStateCursor {
    fn state(&self) -> JsonValue {
        let mut state = JsonObject::new();
        state.insert(NO_CURSOR_STATE_KEY.into(), JsonValue::Bool(true));
        JsonValue::Object(state)
    }

    fn set_initial_state(&self, _state: &JsonValue) -> Result<()> {
        Ok(())
    }

    fn stream_slices<'a>(&'a self, router: &'a dyn PartitionRouter) -> SliceStream<'a> {
        router.stream_slices()
    }

    fn observe(&self, _record: &Record) {
        self.set_lifecycle(CursorLifecycle::observed);
    }

    fn close_partition(&self, _slice: &StreamSlice) -> Result<()> {
        self.set_lifecycle(|_| CursorLifecycle::PartitionClosed);
        Ok(())
    }

    fn ensure_at_least_one_state_emitted(&self) {
        self.set_lifecycle(|_| CursorLifecycle::SyncComplete);
        self.repository
            .emit_message(Message::state(&self.stream_name, self.state()));
    }

    fn lifecycle(&self) -> CursorLifecycle {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
