//! Pagination module
//!
//! Supports: Page Increment, Offset Increment, Cursor (body, headers, link
//! header) and a stop-condition decorator for incremental streams.
//!
//! # Overview
//!
//! A [`PaginationStrategy`] decides the next-page token from the page just
//! read. A [`Paginator`] wraps a strategy and injects the token and page
//! size into the next request.

mod paginator;
mod strategies;
mod types;

pub use paginator::{DefaultPaginator, NoPagination};
pub use strategies::{
    CursorPagination, OffsetIncrement, PageIncrement, StopConditionPaginationStrategyDecorator,
};
pub use types::{PageInput, PaginationStopCondition, PaginationStrategy, Paginator};
