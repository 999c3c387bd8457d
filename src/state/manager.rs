//! State manager implementation
//!
//! Holds the incoming state for a read, folds in the STATE messages the
//! read emits, and persists the result with atomic writes.

use super::types::State;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::types::JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// State manager for loading, tracking and persisting stream state
#[derive(Debug)]
pub struct StateManager {
    /// Path the state was loaded from (empty in memory)
    path: PathBuf,
    /// Current state (shared between clones)
    state: Arc<RwLock<State>>,
}

impl StateManager {
    /// Create an in-memory state manager (no file persistence)
    pub fn in_memory() -> Self {
        Self::with_state(State::new())
    }

    /// Create a state manager around an existing state
    pub fn with_state(state: State) -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Create a state manager from a file; a missing file is an empty state
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;
            parse_state(&contents)?
        } else {
            State::new()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Create a state manager from an inline JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::with_state(parse_state(json)?))
    }

    /// Current state of a stream, `{}` when it has none
    pub async fn get_stream_state(&self, stream: &str) -> JsonValue {
        let state = self.state.read().await;
        state
            .get_stream(stream)
            .cloned()
            .unwrap_or_else(|| JsonValue::Object(Default::default()))
    }

    /// Replace the state of a stream
    pub async fn update(&self, stream: &str, stream_state: JsonValue) {
        let mut state = self.state.write().await;
        state.set_stream(stream, stream_state);
    }

    /// Track a message emitted by the read; only STATE messages matter
    pub async fn observe(&self, message: &Message) {
        if let Message::State { state: body } = message {
            let mut state = self.state.write().await;
            state.apply(body);
        }
    }

    /// STATE message carrying the current state of a stream
    pub async fn create_state_message(&self, stream: &str) -> Message {
        Message::state(stream, self.get_stream_state(stream).await)
    }

    /// Snapshot of the whole state
    pub async fn snapshot(&self) -> State {
        self.state.read().await.clone()
    }

    /// Export state as JSON string
    pub async fn to_json(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }

    /// Save state to a specific file path
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = {
            let state = self.state.read().await;
            serde_json::to_string_pretty(&*state)
                .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))?
        };

        // Write to temp file first, then rename for atomicity
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::state(format!("Failed to write state file: {e}")))?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| Error::state(format!("Failed to rename state file: {e}")))?;

        Ok(())
    }

    /// Save back to the file the state was loaded from
    pub async fn save(&self) -> Result<()> {
        if self.is_in_memory() {
            return Ok(());
        }
        self.save_to_file(&self.path).await
    }

    /// Get the state file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

fn parse_state(contents: &str) -> Result<State> {
    if contents.trim().is_empty() {
        return Ok(State::new());
    }
    let value: JsonValue = serde_json::from_str(contents)
        .map_err(|e| Error::state(format!("Failed to parse state: {e}")))?;
    State::from_value(value)
}
