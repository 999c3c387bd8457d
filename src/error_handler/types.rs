//! Error handler types and traits

use crate::error::Result;
use crate::http::HttpResponse;
use crate::types::FailureType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What to do with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseAction {
    Success,
    #[serde(alias = "RATE_LIMITED")]
    Retry,
    Ignore,
    Fail,
}

impl fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Retry => "RETRY",
            Self::Ignore => "IGNORE",
            Self::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

/// Result of interpreting a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResolution {
    pub response_action: ResponseAction,
    pub failure_type: Option<FailureType>,
    pub error_message: Option<String>,
}

impl ErrorResolution {
    pub fn success() -> Self {
        Self {
            response_action: ResponseAction::Success,
            failure_type: None,
            error_message: None,
        }
    }

    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            response_action: ResponseAction::Retry,
            failure_type: Some(FailureType::TransientError),
            error_message: Some(message.into()),
        }
    }

    pub fn fail(failure_type: FailureType, message: impl Into<String>) -> Self {
        Self {
            response_action: ResponseAction::Fail,
            failure_type: Some(failure_type),
            error_message: Some(message.into()),
        }
    }

    pub fn ignore(message: impl Into<String>) -> Self {
        Self {
            response_action: ResponseAction::Ignore,
            failure_type: None,
            error_message: Some(message.into()),
        }
    }

    /// Message to surface, falling back to a generic one
    pub fn message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| format!("Response action {}", self.response_action))
    }
}

/// A response or the transport error that prevented one
#[derive(Debug, Clone, Copy)]
pub enum HttpOutcome<'a> {
    Response(&'a HttpResponse),
    Transport(&'a str),
}

impl<'a> HttpOutcome<'a> {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response(r) => Some(r.status),
            Self::Transport(_) => None,
        }
    }

    pub fn response(&self) -> Option<&'a HttpResponse> {
        match self {
            Self::Response(r) => Some(r),
            Self::Transport(_) => None,
        }
    }
}

/// Classifies responses and decides how long to wait before a retry
pub trait ErrorHandler: Send + Sync + fmt::Debug {
    /// Decide what to do with a response or transport error
    fn interpret_response(&self, outcome: &HttpOutcome<'_>) -> ErrorResolution;

    /// Maximum number of retries for a single request
    fn max_retries(&self) -> u32;

    /// Upper bound on total time spent retrying a request
    fn max_time(&self) -> Option<Duration>;

    /// Wait before retry number `attempt_count`
    fn backoff_time(&self, outcome: &HttpOutcome<'_>, attempt_count: u32) -> Result<Duration>;
}
