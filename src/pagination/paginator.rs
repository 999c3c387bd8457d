//! Paginators: a strategy plus the request options carrying its token

use super::types::{PageInput, PaginationStrategy, Paginator};
use crate::error::Result;
use crate::http::{RequestOption, RequestOptions};
use crate::interpolation::InterpolationContext;
use crate::types::JsonValue;
use std::sync::Arc;

/// Paginator injecting the token and page size into requests
#[derive(Debug)]
pub struct DefaultPaginator {
    strategy: Box<dyn PaginationStrategy>,
    page_token_option: Option<RequestOption>,
    page_size_option: Option<RequestOption>,
    config: Arc<JsonValue>,
    parameters: Arc<JsonValue>,
}

impl DefaultPaginator {
    pub fn new(
        strategy: Box<dyn PaginationStrategy>,
        config: Arc<JsonValue>,
        parameters: Arc<JsonValue>,
    ) -> Self {
        Self {
            strategy,
            page_token_option: None,
            page_size_option: None,
            config,
            parameters,
        }
    }

    /// Where the token goes; without one the token is not sent
    #[must_use]
    pub fn with_page_token_option(mut self, option: RequestOption) -> Self {
        self.page_token_option = Some(option);
        self
    }

    /// Where the page size goes
    #[must_use]
    pub fn with_page_size_option(mut self, option: RequestOption) -> Self {
        self.page_size_option = Some(option);
        self
    }
}

impl Paginator for DefaultPaginator {
    fn initial_token(&self) -> Option<JsonValue> {
        self.strategy.initial_token()
    }

    fn next_page_token(&self, page: &PageInput<'_>) -> Result<Option<JsonValue>> {
        self.strategy.next_page_token(page)
    }

    fn request_options(&self, token: Option<&JsonValue>) -> RequestOptions {
        let ctx = InterpolationContext::new(&self.config)
            .with_parameters(&self.parameters)
            .with_next_page_token(token);
        let mut options = RequestOptions::new();

        if let (Some(option), Some(token)) = (&self.page_token_option, token) {
            option.inject(token, &mut options, &ctx);
        }
        if let (Some(option), Some(size)) = (&self.page_size_option, self.strategy.page_size()) {
            option.inject(&JsonValue::from(size), &mut options, &ctx);
        }
        options
    }
}

/// A stream with a single page per partition
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPagination;

impl Paginator for NoPagination {
    fn initial_token(&self) -> Option<JsonValue> {
        None
    }

    fn next_page_token(&self, _page: &PageInput<'_>) -> Result<Option<JsonValue>> {
        Ok(None)
    }

    fn request_options(&self, _token: Option<&JsonValue>) -> RequestOptions {
        RequestOptions::new()
    }
}
