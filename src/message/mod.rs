//! Message module
//!
//! The JSON-lines protocol emitted by a read, and the repositories that
//! buffer out-of-band messages until the reader emits them.

mod repository;
mod types;

pub use repository::{InMemoryMessageRepository, MessageRepository, NoopMessageRepository};
pub use types::{
    ConnectorConfig, ControlMessage, ControlType, ErrorTrace, LogMessage, Message, RecordMessage,
    StateMessage, StateType, StreamDescriptor, StreamState, StreamStatus, StreamStatusTrace,
    TraceMessage, TraceType,
};
