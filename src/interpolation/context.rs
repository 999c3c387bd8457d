//! Interpolation context
//!
//! The closed set of names a template may reference. Each component builds
//! the context it can provide; anything it leaves unset resolves to null.

use crate::slice::StreamSlice;
use crate::types::JsonValue;
use std::borrow::Cow;

/// Values visible to `{{ ... }}` expressions
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpolationContext<'a> {
    /// User configuration
    pub config: Option<&'a JsonValue>,
    /// Component parameters from the manifest
    pub parameters: Option<&'a JsonValue>,
    /// Current stream state
    pub stream_state: Option<&'a JsonValue>,
    /// Slice being read
    pub stream_slice: Option<&'a StreamSlice>,
    /// Record under evaluation (record filters)
    pub record: Option<&'a JsonValue>,
    /// Response headers
    pub headers: Option<&'a JsonValue>,
    /// Decoded response body
    pub response: Option<&'a JsonValue>,
    /// Last record of the page
    pub last_record: Option<&'a JsonValue>,
    /// All records of the page
    pub last_records: Option<&'a JsonValue>,
    /// Number of records on the page
    pub last_page_size: Option<usize>,
    /// Token of the page being requested
    pub next_page_token: Option<&'a JsonValue>,
}

impl<'a> InterpolationContext<'a> {
    /// Context with only the user config
    pub fn new(config: &'a JsonValue) -> Self {
        Self {
            config: Some(config),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: &'a JsonValue) -> Self {
        self.parameters = Some(parameters);
        self
    }

    #[must_use]
    pub fn with_stream_state(mut self, state: &'a JsonValue) -> Self {
        self.stream_state = Some(state);
        self
    }

    #[must_use]
    pub fn with_slice(mut self, slice: &'a StreamSlice) -> Self {
        self.stream_slice = Some(slice);
        self
    }

    #[must_use]
    pub fn with_record(mut self, record: &'a JsonValue) -> Self {
        self.record = Some(record);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: &'a JsonValue) -> Self {
        self.headers = Some(headers);
        self
    }

    #[must_use]
    pub fn with_response(mut self, response: &'a JsonValue) -> Self {
        self.response = Some(response);
        self
    }

    #[must_use]
    pub fn with_last_record(mut self, record: Option<&'a JsonValue>) -> Self {
        self.last_record = record;
        self
    }

    #[must_use]
    pub fn with_last_records(mut self, records: &'a JsonValue) -> Self {
        self.last_records = Some(records);
        self
    }

    #[must_use]
    pub fn with_last_page_size(mut self, size: usize) -> Self {
        self.last_page_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_next_page_token(mut self, token: Option<&'a JsonValue>) -> Self {
        self.next_page_token = token;
        self
    }

    /// Resolve a top-level name; `None` for unknown or unset names
    pub fn resolve(&self, name: &str) -> Option<Cow<'a, JsonValue>> {
        let borrowed = |v: Option<&'a JsonValue>| v.map(Cow::Borrowed);
        match name {
            "config" => borrowed(self.config),
            "parameters" => borrowed(self.parameters),
            "stream_state" => borrowed(self.stream_state),
            "stream_slice" => self.stream_slice.map(|s| Cow::Owned(s.to_value())),
            "stream_partition" => self
                .stream_slice
                .map(|s| Cow::Owned(JsonValue::Object(s.partition().clone()))),
            "stream_interval" => self
                .stream_slice
                .map(|s| Cow::Owned(JsonValue::Object(s.cursor_slice().clone()))),
            "record" => borrowed(self.record),
            "headers" => borrowed(self.headers),
            "response" => borrowed(self.response),
            "last_record" => borrowed(self.last_record),
            "last_records" => borrowed(self.last_records),
            "last_page_size" => self.last_page_size.map(|n| Cow::Owned(JsonValue::from(n))),
            "next_page_token" => borrowed(self.next_page_token),
            _ => None,
        }
    }
}
