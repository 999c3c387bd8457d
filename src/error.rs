//! Error types for the declarative CDK
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use crate::types::FailureType;
use thiserror::Error;

/// The main error type for the declarative CDK
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // HTTP Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request failed ({failure_type}): {message}")]
    RequestFailed {
        status: Option<u16>,
        failure_type: FailureType,
        message: String,
    },

    #[error("Max retries ({max_retries}) exceeded: {message}")]
    MaxRetriesExceeded { max_retries: u32, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    // ============================================================================
    // Data Processing Errors
    // ============================================================================
    #[error("JSONPath error: {message}")]
    JsonPath { message: String },

    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    #[error("Invalid stream slice: {message}")]
    Slice { message: String },

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("State error: {message}")]
    State { message: String },

    // ============================================================================
    // Stream Errors
    // ============================================================================
    #[error("Partition error for stream '{stream}': {message}")]
    Partition { stream: String, message: String },

    #[error("Stream '{stream}' failed: {source}")]
    StreamFailed {
        stream: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Queue error: {message}")]
    Queue { message: String },

    // ============================================================================
    // Template Errors
    // ============================================================================
    #[error("Template error: {message}")]
    Template { message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a request failure classified by the error handler
    pub fn request_failed(
        status: Option<u16>,
        failure_type: FailureType,
        message: impl Into<String>,
    ) -> Self {
        Self::RequestFailed {
            status,
            failure_type,
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a JSONPath error
    pub fn json_path(message: impl Into<String>) -> Self {
        Self::JsonPath {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a slice error
    pub fn slice(message: impl Into<String>) -> Self {
        Self::Slice {
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create a partition error
    pub fn partition(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Partition {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Wrap an error raised while reading a stream
    pub fn stream_failed(stream: impl Into<String>, source: Error) -> Self {
        Self::StreamFailed {
            stream: stream.into(),
            source: Box::new(source),
        }
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::RequestFailed { failure_type, .. } => {
                *failure_type == FailureType::TransientError
            }
            Error::StreamFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Classify this error for TRACE error messages
    pub fn failure_type(&self) -> FailureType {
        match self {
            Error::Config { .. }
            | Error::InvalidConfigValue { .. } => FailureType::ConfigError,
            Error::RequestFailed { failure_type, .. } => *failure_type,
            Error::MaxRetriesExceeded { .. } => FailureType::TransientError,
            Error::StreamFailed { source, .. } => source.failure_type(),
            _ => FailureType::SystemError,
        }
    }
}

/// Result type alias for the declarative CDK
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::invalid_value("step", "expected a duration");
        assert_eq!(
            err.to_string(),
            "Invalid config value for 'step': expected a duration"
        );

        let err = Error::request_failed(Some(404), FailureType::SystemError, "Not found");
        assert_eq!(err.to_string(), "Request failed (system_error): Not found");
    }

    #[test]
    fn test_is_retryable() {
        assert!(
            Error::request_failed(Some(503), FailureType::TransientError, "").is_retryable()
        );
        assert!(!Error::request_failed(Some(401), FailureType::ConfigError, "").is_retryable());
        assert!(!Error::config("test").is_retryable());

        let wrapped = Error::stream_failed(
            "users",
            Error::request_failed(Some(500), FailureType::TransientError, "boom"),
        );
        assert!(wrapped.is_retryable());
    }

    #[test]
    fn test_failure_type() {
        assert_eq!(Error::config("x").failure_type(), FailureType::ConfigError);
        assert_eq!(
            Error::decode("bad body").failure_type(),
            FailureType::SystemError
        );
        assert_eq!(
            Error::stream_failed("s", Error::invalid_value("step", "x")).failure_type(),
            FailureType::ConfigError
        );
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(Error::config("inner"));
        let with_context = result.context("outer");
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("outer: Configuration error: inner"));
    }
}
