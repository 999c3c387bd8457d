//! Error handler module
//!
//! Classifies HTTP responses and transport errors into an action
//! (SUCCESS, RETRY, IGNORE, FAIL) and a failure type, and computes how long
//! to wait before retrying.
//!
//! # Overview
//!
//! Manifest response filters are consulted first, then a static mapping by
//! status code. Backoff strategies are tried in order; the first one that
//! yields a wait time wins, with exponential backoff as the fallback.

mod backoff;
mod handlers;
mod types;

pub use backoff::{BackoffStrategy, DEFAULT_BACKOFF_FACTOR};
pub use handlers::{
    default_resolution, CompositeErrorHandler, DefaultErrorHandler, HttpResponseFilter,
    DEFAULT_MAX_RETRIES,
};
pub use types::{ErrorHandler, ErrorResolution, HttpOutcome, ResponseAction};
