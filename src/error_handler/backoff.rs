//! Backoff strategies
//!
//! Each strategy returns `None` when it has no opinion, letting the next
//! strategy (or the default exponential backoff) decide.

use super::types::HttpOutcome;
use crate::error::{Error, Result};
use crate::types::FailureType;
use chrono::Utc;
use regex::Regex;
use std::time::Duration;

/// Default exponential factor in seconds
pub const DEFAULT_BACKOFF_FACTOR: f64 = 5.0;

/// How long to wait before retrying a request
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// `factor * 2^attempt_count` seconds
    Exponential { factor: f64 },
    /// A fixed wait
    Constant { backoff_time_in_seconds: f64 },
    /// Seconds to wait read from a response header
    WaitTimeFromHeader {
        header: String,
        regex: Option<Regex>,
        max_waiting_time_in_seconds: Option<f64>,
    },
    /// Epoch timestamp to wait until, read from a response header
    WaitUntilTimeFromHeader {
        header: String,
        regex: Option<Regex>,
        min_wait: Option<f64>,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl BackoffStrategy {
    /// Compile an optional header regex
    pub fn compile_regex(pattern: Option<&str>) -> Result<Option<Regex>> {
        pattern
            .map(|p| {
                Regex::new(p).map_err(|e| Error::invalid_value("regex", format!("'{p}': {e}")))
            })
            .transpose()
    }

    /// Wait time for retry number `attempt_count`
    pub fn backoff_time(
        &self,
        outcome: &HttpOutcome<'_>,
        attempt_count: Option<u32>,
    ) -> Result<Option<Duration>> {
        match self {
            Self::Exponential { factor } => {
                let attempt = attempt_count.ok_or_else(|| {
                    Error::invalid_argument("attempt_count is required for exponential backoff")
                })?;
                let secs = factor * 2f64.powi(attempt.min(30) as i32);
                Ok(Some(seconds(secs)))
            }
            Self::Constant {
                backoff_time_in_seconds,
            } => Ok(Some(seconds(*backoff_time_in_seconds))),
            Self::WaitTimeFromHeader {
                header,
                regex,
                max_waiting_time_in_seconds,
            } => {
                let Some(wait) = header_number(outcome, header, regex.as_ref()) else {
                    return Ok(None);
                };
                if let Some(max) = max_waiting_time_in_seconds {
                    if wait > *max {
                        return Err(Error::request_failed(
                            outcome.status(),
                            FailureType::TransientError,
                            format!("Rate limit wait time {wait}s exceeds the maximum of {max}s"),
                        ));
                    }
                }
                Ok(Some(seconds(wait)))
            }
            Self::WaitUntilTimeFromHeader {
                header,
                regex,
                min_wait,
            } => {
                let Some(until) = header_number(outcome, header, regex.as_ref()) else {
                    return Ok(min_wait.map(seconds));
                };
                let now = Utc::now().timestamp_millis() as f64 / 1000.0;
                let wait = until - now;
                let wait = match min_wait {
                    Some(min) if wait < *min => *min,
                    _ => wait.max(0.0),
                };
                Ok(Some(seconds(wait)))
            }
        }
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}

fn header_number(outcome: &HttpOutcome<'_>, header: &str, regex: Option<&Regex>) -> Option<f64> {
    let value = outcome.response()?.header(header)?;
    let value = match regex {
        Some(re) => {
            let caps = re.captures(value)?;
            caps.get(1).or_else(|| caps.get(0))?.as_str()
        }
        None => value,
    };
    value.trim().parse::<f64>().ok()
}
