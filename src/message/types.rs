//! Protocol message types
//!
//! Messages serialize to one JSON object per line with a `type`
//! discriminator: RECORD, STATE, LOG, TRACE or CONTROL.

use crate::error::{Error, Result};
use crate::types::{FailureType, JsonObject, JsonValue, LogLevel};
use chrono::Utc;
use serde::{Deserialize, Serialize};

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A message emitted during a read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Message {
    Record { record: RecordMessage },
    State { state: StateMessage },
    Log { log: LogMessage },
    Trace { trace: TraceMessage },
    Control { control: ControlMessage },
}

impl Message {
    /// Create a record message
    pub fn record(stream: impl Into<String>, data: JsonValue) -> Self {
        Self::Record {
            record: RecordMessage {
                stream: stream.into(),
                data,
                emitted_at: now_millis(),
            },
        }
    }

    /// Create a per-stream state message
    pub fn state(stream: impl Into<String>, stream_state: JsonValue) -> Self {
        Self::State {
            state: StateMessage::stream(stream, stream_state),
        }
    }

    /// Create a log message
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            log: LogMessage {
                level,
                message: message.into(),
            },
        }
    }

    /// Create an error trace for a failed sync
    pub fn error_trace(stream: Option<&str>, error: &Error) -> Self {
        Self::Trace {
            trace: TraceMessage {
                trace_type: TraceType::Error,
                emitted_at: now_millis() as f64,
                error: Some(ErrorTrace {
                    message: format!("An error occurred during the sync: {error}"),
                    internal_message: Some(format!("{error:?}")),
                    failure_type: error.failure_type(),
                    stream_descriptor: stream.map(StreamDescriptor::new),
                }),
                stream_status: None,
            },
        }
    }

    /// Create a stream status trace
    pub fn stream_status(stream: impl Into<String>, status: StreamStatus) -> Self {
        Self::Trace {
            trace: TraceMessage {
                trace_type: TraceType::StreamStatus,
                emitted_at: now_millis() as f64,
                error: None,
                stream_status: Some(StreamStatusTrace {
                    stream_descriptor: StreamDescriptor::new(stream),
                    status,
                }),
            },
        }
    }

    /// Create a control message carrying an updated connector config
    pub fn connector_config(config: JsonValue) -> Self {
        Self::Control {
            control: ControlMessage {
                control_type: ControlType::ConnectorConfig,
                emitted_at: now_millis() as f64,
                connector_config: ConnectorConfig { config },
            },
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record { .. })
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }

    /// Stream this message belongs to, if any
    pub fn stream_name(&self) -> Option<&str> {
        match self {
            Self::Record { record } => Some(&record.stream),
            Self::State { state } => state.stream.as_ref().map(|s| s.stream_descriptor.name.as_str()),
            Self::Trace { trace } => trace
                .stream_status
                .as_ref()
                .map(|s| s.stream_descriptor.name.as_str())
                .or_else(|| {
                    trace
                        .error
                        .as_ref()
                        .and_then(|e| e.stream_descriptor.as_ref())
                        .map(|d| d.name.as_str())
                }),
            Self::Log { .. } | Self::Control { .. } => None,
        }
    }

    /// Serialize as a single JSON line (no trailing newline)
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    pub data: JsonValue,
    /// Milliseconds since the epoch
    pub emitted_at: i64,
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateType {
    #[default]
    Stream,
    Global,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub stream_descriptor: StreamDescriptor,
    #[serde(default)]
    pub stream_state: JsonValue,
}

/// `{"type":"STREAM","stream":{...},"data":{name: state}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    #[serde(rename = "type", default)]
    pub state_type: StateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamState>,
    #[serde(default)]
    pub data: JsonValue,
}

impl StateMessage {
    /// Per-stream state; `data` mirrors it under the stream name
    pub fn stream(stream: impl Into<String>, stream_state: JsonValue) -> Self {
        let name = stream.into();
        let mut data = JsonObject::new();
        data.insert(name.clone(), stream_state.clone());
        Self {
            state_type: StateType::Stream,
            stream: Some(StreamState {
                stream_descriptor: StreamDescriptor::new(name),
                stream_state,
            }),
            data: JsonValue::Object(data),
        }
    }
}

// ============================================================================
// LOG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

// ============================================================================
// TRACE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceType {
    Error,
    StreamStatus,
}

/// Stream lifecycle reported to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamStatus {
    Started,
    Running,
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTrace {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    pub failure_type: FailureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_descriptor: Option<StreamDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatusTrace {
    pub stream_descriptor: StreamDescriptor,
    pub status: StreamStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMessage {
    #[serde(rename = "type")]
    pub trace_type: TraceType,
    pub emitted_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_status: Option<StreamStatusTrace>,
}

// ============================================================================
// CONTROL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    ConnectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub config: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub control_type: ControlType,
    pub emitted_at: f64,
    pub connector_config: ConnectorConfig,
}
