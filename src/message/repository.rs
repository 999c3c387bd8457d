//! Message repositories
//!
//! Components that produce out-of-band messages (state checkpoints, logs)
//! push them into a repository; the reader drains it in order.

use super::types::Message;
use crate::types::LogLevel;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Ordered sink for messages produced outside the record flow
pub trait MessageRepository: Send + Sync + fmt::Debug {
    /// Queue a message for emission
    fn emit_message(&self, message: Message);

    /// Queue a LOG message if `level` passes the repository's filter.
    /// The message is only built when it will be kept.
    fn log_message(&self, level: LogLevel, message: &dyn Fn() -> String);

    /// Take every queued message, oldest first
    fn consume_queue(&self) -> Vec<Message>;
}

/// Keeps messages in memory until consumed
#[derive(Debug)]
pub struct InMemoryMessageRepository {
    queue: Mutex<VecDeque<Message>>,
    log_level: LogLevel,
}

impl Default for InMemoryMessageRepository {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl InMemoryMessageRepository {
    /// Create a repository keeping logs at `log_level` or more severe
    pub fn new(log_level: LogLevel) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            log_level,
        }
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageRepository for InMemoryMessageRepository {
    fn emit_message(&self, message: Message) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);
    }

    fn log_message(&self, level: LogLevel, message: &dyn Fn() -> String) {
        if self.log_level.allows(level) {
            self.emit_message(Message::log(level, message()));
        }
    }

    fn consume_queue(&self) -> Vec<Message> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

/// Discards everything; used by per-partition child cursors
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMessageRepository;

impl MessageRepository for NoopMessageRepository {
    fn emit_message(&self, _message: Message) {}

    fn log_message(&self, _level: LogLevel, _message: &dyn Fn() -> String) {}

    fn consume_queue(&self) -> Vec<Message> {
        Vec::new()
    }
}
