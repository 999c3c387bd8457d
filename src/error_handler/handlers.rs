//! Error handler implementations

use super::backoff::BackoffStrategy;
use super::types::{ErrorHandler, ErrorResolution, HttpOutcome, ResponseAction};
use crate::error::Result;
use crate::http::HttpResponse;
use crate::interpolation::{InterpolatedBoolean, InterpolatedString, InterpolationContext};
use crate::types::{FailureType, JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default retry budget per request
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Static status mapping applied when no manifest filter matches
pub fn default_resolution(status: u16) -> ErrorResolution {
    match status {
        200..=399 => ErrorResolution::success(),
        400 => ErrorResolution::fail(
            FailureType::SystemError,
            "Bad request. Please check your request parameters.",
        ),
        401 => ErrorResolution::fail(
            FailureType::ConfigError,
            "Unauthorized. Please ensure you are authenticated correctly.",
        ),
        403 => ErrorResolution::fail(
            FailureType::ConfigError,
            "Forbidden. You don't have permission to access this resource.",
        ),
        404 => ErrorResolution::fail(
            FailureType::SystemError,
            "Not found. The requested resource was not found on the server.",
        ),
        408 => ErrorResolution::fail(
            FailureType::TransientError,
            "Request timeout. Please try again later.",
        ),
        429 => ErrorResolution::retry("Too many requests."),
        500..=599 => ErrorResolution::retry(format!(
            "Internal server error (HTTP {status}). Please try again later."
        )),
        400..=499 => ErrorResolution::fail(
            FailureType::ConfigError,
            format!("Unexpected client error (HTTP {status})."),
        ),
        _ => ErrorResolution::fail(
            FailureType::SystemError,
            format!("Unexpected response status {status}."),
        ),
    }
}

// ============================================================================
// HttpResponseFilter
// ============================================================================

/// A manifest rule mapping matching responses to an action
#[derive(Debug, Clone)]
pub struct HttpResponseFilter {
    pub action: Option<ResponseAction>,
    pub failure_type: Option<FailureType>,
    pub http_codes: Vec<u16>,
    pub error_message_contains: Option<String>,
    pub predicate: Option<InterpolatedBoolean>,
    pub error_message: Option<InterpolatedString>,
    config: Arc<JsonValue>,
}

impl HttpResponseFilter {
    pub fn new(config: Arc<JsonValue>) -> Self {
        Self {
            action: None,
            failure_type: None,
            http_codes: Vec::new(),
            error_message_contains: None,
            predicate: None,
            error_message: None,
            config,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: ResponseAction) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn with_failure_type(mut self, failure_type: FailureType) -> Self {
        self.failure_type = Some(failure_type);
        self
    }

    #[must_use]
    pub fn with_http_codes(mut self, codes: Vec<u16>) -> Self {
        self.http_codes = codes;
        self
    }

    #[must_use]
    pub fn with_error_message_contains(mut self, needle: impl Into<String>) -> Self {
        self.error_message_contains = Some(needle.into());
        self
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: InterpolatedBoolean) -> Self {
        self.predicate = Some(predicate);
        self
    }

    #[must_use]
    pub fn with_error_message(mut self, message: InterpolatedString) -> Self {
        self.error_message = Some(message);
        self
    }

    /// Resolution for a matching response, `None` if the filter does not apply
    pub fn matches(&self, response: &HttpResponse) -> Option<ErrorResolution> {
        let body = response.json().unwrap_or(JsonValue::Null);
        let headers = response.headers_json();
        let ctx = InterpolationContext::new(&self.config)
            .with_response(&body)
            .with_headers(&headers);

        let by_code = self.http_codes.contains(&response.status);
        let by_message = self
            .error_message_contains
            .as_ref()
            .is_some_and(|needle| response.text().contains(needle.as_str()));
        let by_predicate = self.predicate.as_ref().is_some_and(|p| p.eval(&ctx));
        if !(by_code || by_message || by_predicate) {
            return None;
        }

        let fallback = default_resolution(response.status);
        let message = self
            .error_message
            .as_ref()
            .map(|m| m.eval_string(&ctx))
            .filter(|m| !m.is_empty())
            .or(fallback.error_message);
        Some(ErrorResolution {
            response_action: self.action.unwrap_or(fallback.response_action),
            failure_type: self
                .failure_type
                .or(fallback.failure_type)
                .or(Some(FailureType::SystemError)),
            error_message: message,
        })
    }
}

// ============================================================================
// DefaultErrorHandler
// ============================================================================

/// Manifest filters first, then the static status mapping
#[derive(Debug, Clone)]
pub struct DefaultErrorHandler {
    pub response_filters: Vec<HttpResponseFilter>,
    pub backoff_strategies: Vec<BackoffStrategy>,
    pub max_retries: u32,
    pub max_time: Option<Duration>,
}

impl Default for DefaultErrorHandler {
    fn default() -> Self {
        Self {
            response_filters: Vec::new(),
            backoff_strategies: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_time: None,
        }
    }
}

impl DefaultErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filter(mut self, filter: HttpResponseFilter) -> Self {
        self.response_filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategies.push(strategy);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn interpret_response(&self, outcome: &HttpOutcome<'_>) -> ErrorResolution {
        match outcome {
            HttpOutcome::Transport(message) => {
                ErrorResolution::retry(format!("Transport error: {message}"))
            }
            HttpOutcome::Response(response) => {
                if let Some(resolution) = self
                    .response_filters
                    .iter()
                    .find_map(|filter| filter.matches(response))
                {
                    debug!(
                        status = response.status,
                        action = %resolution.response_action,
                        "Response matched a response filter"
                    );
                    return resolution;
                }
                default_resolution(response.status)
            }
        }
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn max_time(&self) -> Option<Duration> {
        self.max_time
    }

    fn backoff_time(&self, outcome: &HttpOutcome<'_>, attempt_count: u32) -> Result<Duration> {
        for strategy in &self.backoff_strategies {
            if let Some(wait) = strategy.backoff_time(outcome, Some(attempt_count))? {
                return Ok(wait);
            }
        }
        Ok(BackoffStrategy::default()
            .backoff_time(outcome, Some(attempt_count))?
            .unwrap_or_default())
    }
}

// ============================================================================
// CompositeErrorHandler
// ============================================================================

/// Consults handlers in order; the first non-failing resolution wins
#[derive(Debug)]
pub struct CompositeErrorHandler {
    handlers: Vec<Box<dyn ErrorHandler>>,
}

impl CompositeErrorHandler {
    pub fn new(handlers: Vec<Box<dyn ErrorHandler>>) -> Self {
        Self { handlers }
    }

    fn retrying_handler(&self, outcome: &HttpOutcome<'_>) -> Option<&dyn ErrorHandler> {
        self.handlers
            .iter()
            .find(|h| h.interpret_response(outcome).response_action == ResponseAction::Retry)
            .map(|h| &**h)
    }
}

impl ErrorHandler for CompositeErrorHandler {
    fn interpret_response(&self, outcome: &HttpOutcome<'_>) -> ErrorResolution {
        let mut first_failure = None;
        for handler in &self.handlers {
            let resolution = handler.interpret_response(outcome);
            if resolution.response_action != ResponseAction::Fail {
                return resolution;
            }
            first_failure.get_or_insert(resolution);
        }
        first_failure.unwrap_or_else(|| match outcome {
            HttpOutcome::Response(r) => default_resolution(r.status),
            HttpOutcome::Transport(m) => ErrorResolution::retry(*m),
        })
    }

    fn max_retries(&self) -> u32 {
        self.handlers
            .first()
            .map_or(DEFAULT_MAX_RETRIES, |h| h.max_retries())
    }

    fn max_time(&self) -> Option<Duration> {
        self.handlers.first().and_then(|h| h.max_time())
    }

    fn backoff_time(&self, outcome: &HttpOutcome<'_>, attempt_count: u32) -> Result<Duration> {
        match self.retrying_handler(outcome) {
            Some(handler) => handler.backoff_time(outcome, attempt_count),
            None => DefaultErrorHandler::default().backoff_time(outcome, attempt_count),
        }
    }
}
