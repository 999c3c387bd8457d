//! State types for tracking sync progress
//!
//! Incoming state is accepted in two shapes:
//! - a list of STATE messages, as emitted by a previous sync
//! - a plain `{stream_name: stream_state}` mapping
//!
//! Both are normalized into [`State`], which serializes as the mapping.

use crate::error::{Error, Result};
use crate::message::{Message, StateMessage, StateType};
use crate::types::JsonValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete state for a connector: one JSON state per stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    pub streams: BTreeMap<String, JsonValue>,
}

impl State {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize either accepted input shape into a state
    pub fn from_value(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::Object(map) => Ok(Self {
                streams: map.into_iter().collect(),
            }),
            JsonValue::Array(items) => {
                let mut state = Self::new();
                for item in items {
                    state.apply_message_value(item)?;
                }
                Ok(state)
            }
            other => Err(Error::state(format!(
                "State must be a list of STATE messages or a mapping, got {other}"
            ))),
        }
    }

    /// Accepts `{"type":"STATE","state":{...}}` or a bare state message body
    fn apply_message_value(&mut self, item: JsonValue) -> Result<()> {
        let body = match item {
            JsonValue::Object(mut map)
                if map.get("type").and_then(JsonValue::as_str) == Some("STATE") =>
            {
                map.remove("state").unwrap_or(JsonValue::Null)
            }
            other => other,
        };
        let message: StateMessage = serde_json::from_value(body)
            .map_err(|e| Error::state(format!("Invalid state message: {e}")))?;
        self.apply(&message);
        Ok(())
    }

    /// Fold one state message into this state; later messages win
    pub fn apply(&mut self, message: &StateMessage) {
        match (message.state_type, &message.stream) {
            (StateType::Stream, Some(stream)) => {
                self.streams.insert(
                    stream.stream_descriptor.name.clone(),
                    stream.stream_state.clone(),
                );
            }
            _ => {
                if let JsonValue::Object(data) = &message.data {
                    for (name, value) in data {
                        self.streams.insert(name.clone(), value.clone());
                    }
                }
            }
        }
    }

    /// Get state for a stream
    pub fn get_stream(&self, stream: &str) -> Option<&JsonValue> {
        self.streams.get(stream)
    }

    /// Replace the state of a stream
    pub fn set_stream(&mut self, stream: impl Into<String>, state: JsonValue) {
        self.streams.insert(stream.into(), state);
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// One STATE message per stream, in stream-name order
    pub fn to_messages(&self) -> Vec<Message> {
        self.streams
            .iter()
            .map(|(name, state)| Message::state(name.clone(), state.clone()))
            .collect()
    }
}
