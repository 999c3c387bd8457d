//! Pagination types and traits
//!
//! Defines the core pagination abstractions used by all strategies.

use crate::error::Result;
use crate::http::{HttpResponse, RequestOptions};
use crate::record::Record;
use crate::types::JsonValue;

/// What a strategy sees after a page was read
#[derive(Debug, Clone, Copy)]
pub struct PageInput<'a> {
    /// Raw response of the page
    pub response: &'a HttpResponse,
    /// Number of records extracted from the page
    pub last_page_size: usize,
    /// Last record extracted from the page
    pub last_record: Option<&'a Record>,
    /// Token used to request the page, `None` for the first page
    pub previous_token: Option<&'a JsonValue>,
}

impl<'a> PageInput<'a> {
    /// Input for a page with no records
    pub fn new(response: &'a HttpResponse) -> Self {
        Self {
            response,
            last_page_size: 0,
            last_record: None,
            previous_token: None,
        }
    }

    #[must_use]
    pub fn with_last_page_size(mut self, size: usize) -> Self {
        self.last_page_size = size;
        self
    }

    #[must_use]
    pub fn with_last_record(mut self, record: Option<&'a Record>) -> Self {
        self.last_record = record;
        self
    }

    #[must_use]
    pub fn with_previous_token(mut self, token: Option<&'a JsonValue>) -> Self {
        self.previous_token = token;
        self
    }
}

/// Decides the token of the next page
///
/// Strategies are stateless: progress is derived from the previous token,
/// so one strategy can serve many partitions concurrently. Resetting
/// pagination means starting over from [`PaginationStrategy::initial_token`].
pub trait PaginationStrategy: Send + Sync + std::fmt::Debug {
    /// Token for the first request, `None` when nothing is injected
    fn initial_token(&self) -> Option<JsonValue>;

    /// Token for the next page, `None` to stop paginating
    fn next_page_token(&self, page: &PageInput<'_>) -> Result<Option<JsonValue>>;

    /// Page size to inject on every request
    fn page_size(&self) -> Option<u64> {
        None
    }
}

/// A condition that ends pagination early based on the last record
pub trait PaginationStopCondition: Send + Sync + std::fmt::Debug {
    fn is_met(&self, record: &Record) -> bool;
}

/// Strategy plus the request options that carry its tokens
pub trait Paginator: Send + Sync + std::fmt::Debug {
    /// Token for the first request of a partition
    fn initial_token(&self) -> Option<JsonValue>;

    /// Token for the next page, `None` to stop paginating
    fn next_page_token(&self, page: &PageInput<'_>) -> Result<Option<JsonValue>>;

    /// Request options injecting `token` and the page size
    fn request_options(&self, token: Option<&JsonValue>) -> RequestOptions;
}
