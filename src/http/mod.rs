//! HTTP module
//!
//! Provides the requester, the HTTP client with retry and rate limiting,
//! and request option injection.
//!
//! # Features
//!
//! - **Requester**: resolves `url_base`, `path` and request options from
//!   manifest templates for each slice and page
//! - **Automatic Retries**: driven by the stream's error handler
//! - **Rate Limiting**: Token bucket rate limiter using governor
//! - **Request Options**: inject values into query params, headers, JSON body
//!   or the request path

mod client;
mod rate_limit;
mod requester;
mod types;

pub use client::{HttpClient, HttpClientConfig};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use requester::{HttpRequester, InterpolatedRequestOptionsProvider, RequestInput, Requester};
pub use types::{
    parse_link_header, HttpRequest, HttpResponse, InjectInto, RequestOption, RequestOptions,
};
