//! Pagination strategy implementations
//!
//! Each strategy handles a specific pagination pattern.

use super::types::{PageInput, PaginationStopCondition, PaginationStrategy};
use crate::decode::{Decoder, JsonDecoder};
use crate::error::{Error, Result};
use crate::interpolation::{InterpolatedBoolean, InterpolatedString, InterpolationContext};
use crate::types::{JsonObject, JsonValue};
use std::sync::Arc;
use tracing::debug;

/// Integer value of the previous token; anything else is a caller error
fn previous_index(token: Option<&JsonValue>) -> Result<Option<u64>> {
    match token {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            Error::invalid_argument(format!("Expected an integer page token, got {value}"))
        }),
    }
}

/// First decoded document of a response, `{}` when there is none
fn first_document(decoder: &dyn Decoder, page: &PageInput<'_>) -> Result<JsonValue> {
    Ok(decoder
        .decode(page.response)?
        .into_iter()
        .next()
        .unwrap_or_else(|| JsonValue::Object(JsonObject::new())))
}

// ============================================================================
// Page Increment
// ============================================================================

/// Page number pagination
///
/// The token is the page number. Pages are requested until one comes back
/// short or empty, or until the reported total page count is reached.
#[derive(Debug, Clone)]
pub struct PageIncrement {
    pub page_size: Option<u64>,
    pub start_from_page: u64,
    pub inject_on_first_request: bool,
    total_pages_path: Option<Vec<String>>,
    decoder: Arc<dyn Decoder>,
}

impl PageIncrement {
    /// Create a page increment strategy starting at `start_from_page`
    pub fn new(page_size: Option<u64>, start_from_page: u64) -> Self {
        Self {
            page_size,
            start_from_page,
            inject_on_first_request: false,
            total_pages_path: None,
            decoder: Arc::new(JsonDecoder::new()),
        }
    }

    #[must_use]
    pub fn with_inject_on_first_request(mut self, inject: bool) -> Self {
        self.inject_on_first_request = inject;
        self
    }

    /// Read the total page count from this path of the decoded body
    #[must_use]
    pub fn with_total_pages_path(mut self, path: Vec<String>, decoder: Arc<dyn Decoder>) -> Self {
        self.total_pages_path = Some(path);
        self.decoder = decoder;
        self
    }

    fn total_pages(&self, page: &PageInput<'_>) -> Result<Option<u64>> {
        let Some(ref path) = self.total_pages_path else {
            return Ok(None);
        };
        let body = first_document(self.decoder.as_ref(), page)?;
        let total = path.iter().try_fold(&body, |value, key| value.get(key));
        Ok(total.and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok())))
    }
}

impl PaginationStrategy for PageIncrement {
    fn initial_token(&self) -> Option<JsonValue> {
        self.inject_on_first_request
            .then(|| JsonValue::from(self.start_from_page))
    }

    fn next_page_token(&self, page: &PageInput<'_>) -> Result<Option<JsonValue>> {
        if page.last_page_size == 0 {
            return Ok(None);
        }
        if let Some(size) = self.page_size {
            if (page.last_page_size as u64) < size {
                return Ok(None);
            }
        }

        let next = match previous_index(page.previous_token)? {
            Some(previous) if previous < self.start_from_page => {
                return Err(Error::invalid_argument(format!(
                    "Page token {previous} is below the first page {}",
                    self.start_from_page
                )));
            }
            Some(previous) => previous + 1,
            None => self.start_from_page + 1,
        };

        if let Some(total) = self.total_pages(page)? {
            if next - self.start_from_page >= total {
                debug!(total, "Reached the reported page count");
                return Ok(None);
            }
        }
        Ok(Some(JsonValue::from(next)))
    }

    fn page_size(&self) -> Option<u64> {
        self.page_size
    }
}

// ============================================================================
// Offset Increment
// ============================================================================

/// Offset pagination: the token is the number of records read so far
#[derive(Debug, Clone)]
pub struct OffsetIncrement {
    pub page_size: Option<u64>,
    pub inject_on_first_request: bool,
}

impl OffsetIncrement {
    pub fn new(page_size: Option<u64>) -> Self {
        Self {
            page_size,
            inject_on_first_request: false,
        }
    }

    #[must_use]
    pub fn with_inject_on_first_request(mut self, inject: bool) -> Self {
        self.inject_on_first_request = inject;
        self
    }
}

impl PaginationStrategy for OffsetIncrement {
    fn initial_token(&self) -> Option<JsonValue> {
        self.inject_on_first_request.then(|| JsonValue::from(0))
    }

    fn next_page_token(&self, page: &PageInput<'_>) -> Result<Option<JsonValue>> {
        if page.last_page_size == 0 {
            return Ok(None);
        }
        if let Some(size) = self.page_size {
            if (page.last_page_size as u64) < size {
                return Ok(None);
            }
        }
        let offset = previous_index(page.previous_token)?.unwrap_or(0);
        Ok(Some(JsonValue::from(offset + page.last_page_size as u64)))
    }

    fn page_size(&self) -> Option<u64> {
        self.page_size
    }
}

// ============================================================================
// Cursor Pagination
// ============================================================================

/// Cursor-based pagination (e.g., Stripe, Slack, GitHub link headers)
///
/// `cursor_value` is evaluated against the decoded body (`response`), the
/// headers (`headers`, with `headers.link.next.url`), `last_record` and
/// `last_page_size`. An empty value stops pagination.
#[derive(Debug, Clone)]
pub struct CursorPagination {
    cursor_value: InterpolatedString,
    stop_condition: Option<InterpolatedBoolean>,
    page_size: Option<u64>,
    decoder: Arc<dyn Decoder>,
    config: Arc<JsonValue>,
    parameters: Arc<JsonValue>,
}

impl CursorPagination {
    pub fn new(
        cursor_value: InterpolatedString,
        decoder: Arc<dyn Decoder>,
        config: Arc<JsonValue>,
        parameters: Arc<JsonValue>,
    ) -> Self {
        Self {
            cursor_value,
            stop_condition: None,
            page_size: None,
            decoder,
            config,
            parameters,
        }
    }

    #[must_use]
    pub fn with_stop_condition(mut self, condition: InterpolatedBoolean) -> Self {
        self.stop_condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

impl PaginationStrategy for CursorPagination {
    fn initial_token(&self) -> Option<JsonValue> {
        None
    }

    fn next_page_token(&self, page: &PageInput<'_>) -> Result<Option<JsonValue>> {
        let body = first_document(self.decoder.as_ref(), page)?;
        let headers = page.response.headers_json();
        let ctx = InterpolationContext::new(&self.config)
            .with_parameters(&self.parameters)
            .with_response(&body)
            .with_headers(&headers)
            .with_last_record(page.last_record.map(|r| &r.data))
            .with_last_page_size(page.last_page_size);

        if let Some(ref condition) = self.stop_condition {
            if condition.eval(&ctx) {
                debug!(condition = condition.source(), "Pagination stop condition met");
                return Ok(None);
            }
        }
        Ok(self.cursor_value.eval_optional(&ctx))
    }

    fn page_size(&self) -> Option<u64> {
        self.page_size
    }
}

// ============================================================================
// Stop condition decorator
// ============================================================================

/// Stops as soon as the last record of a page meets the stop condition,
/// whatever the wrapped strategy would return
#[derive(Debug)]
pub struct StopConditionPaginationStrategyDecorator {
    inner: Box<dyn PaginationStrategy>,
    stop_condition: Arc<dyn PaginationStopCondition>,
}

impl StopConditionPaginationStrategyDecorator {
    pub fn new(
        inner: Box<dyn PaginationStrategy>,
        stop_condition: Arc<dyn PaginationStopCondition>,
    ) -> Self {
        Self {
            inner,
            stop_condition,
        }
    }
}

impl PaginationStrategy for StopConditionPaginationStrategyDecorator {
    fn initial_token(&self) -> Option<JsonValue> {
        self.inner.initial_token()
    }

    fn next_page_token(&self, page: &PageInput<'_>) -> Result<Option<JsonValue>> {
        if let Some(record) = page.last_record {
            if self.stop_condition.is_met(record) {
                debug!(stream = %record.stream_name, "Last record already synced, stopping pagination");
                return Ok(None);
            }
        }
        self.inner.next_page_token(page)
    }

    fn page_size(&self) -> Option<u64> {
        self.inner.page_size()
    }
}
