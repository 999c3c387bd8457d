//! HTTP client with retry and rate limiting
//!
//! Sends fully resolved requests and drives the retry loop:
//! - Every attempt waits on the shared rate limiter
//! - The error handler classifies each response or transport error
//! - Retries sleep for the handler's backoff time, bounded by
//!   `max_retries` and `max_time`

use super::rate_limit::{RateLimiter, RateLimiterConfig};
use super::types::{HttpRequest, HttpResponse};
use crate::error::{Error, Result};
use crate::error_handler::{ErrorHandler, HttpOutcome, ResponseAction};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Rate limiter configuration
    pub rate_limit: Option<RateLimiterConfig>,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            rate_limit: None,
            user_agent: format!("declarative-cdk/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the rate limiter
    #[must_use]
    pub fn with_rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }
}

/// HTTP client with retry and rate limiting
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    rate_limiter: Option<RateLimiter>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new);

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    /// Check if rate limiting is enabled
    pub fn has_rate_limiter(&self) -> bool {
        self.rate_limiter.is_some()
    }

    /// Send a request, retrying as the error handler decides.
    ///
    /// Returns `Ok(None)` when the handler ignores the response.
    pub async fn send(
        &self,
        request: &HttpRequest,
        handler: &dyn ErrorHandler,
    ) -> Result<Option<HttpResponse>> {
        let started = Instant::now();
        let max_retries = handler.max_retries();
        let mut attempt: u32 = 0;

        loop {
            if let Some(ref limiter) = self.rate_limiter {
                limiter.wait().await;
            }

            let result = self.execute(request).await;
            let transport_message = result.as_ref().err().map(ToString::to_string);
            let outcome = match (&result, &transport_message) {
                (Ok(response), _) => HttpOutcome::Response(response),
                (Err(_), Some(message)) => HttpOutcome::Transport(message),
                (Err(_), None) => HttpOutcome::Transport("transport error"),
            };
            let resolution = handler.interpret_response(&outcome);

            match resolution.response_action {
                ResponseAction::Success => {
                    debug!(method = ?request.method, url = %request.url, "Request succeeded");
                    return result.map(Some).map_err(Error::Http);
                }
                ResponseAction::Ignore => {
                    info!(
                        url = %request.url,
                        status = ?outcome.status(),
                        "Ignoring response: {}",
                        resolution.message()
                    );
                    return Ok(None);
                }
                ResponseAction::Fail => {
                    return Err(Error::request_failed(
                        outcome.status(),
                        resolution.failure_type.unwrap_or_default(),
                        resolution.message(),
                    ));
                }
                ResponseAction::Retry => {
                    if attempt >= max_retries {
                        return Err(Error::MaxRetriesExceeded {
                            max_retries,
                            message: resolution.message(),
                        });
                    }
                    let delay = handler.backoff_time(&outcome, attempt)?;
                    if let Some(max_time) = handler.max_time() {
                        if started.elapsed() + delay > max_time {
                            return Err(Error::MaxRetriesExceeded {
                                max_retries: attempt,
                                message: format!(
                                    "{} (retry time budget of {max_time:?} exhausted)",
                                    resolution.message()
                                ),
                            });
                        }
                    }
                    warn!(
                        url = %request.url,
                        status = ?outcome.status(),
                        "Request failed, attempt {}/{}, retrying in {:?}: {}",
                        attempt + 1,
                        max_retries + 1,
                        delay,
                        resolution.message()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Perform a single attempt and buffer the body
    async fn execute(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, reqwest::Error> {
        let mut req = self
            .client
            .request(request.method.into(), &request.url)
            .timeout(self.config.timeout);

        for (key, value) in &request.headers {
            req = req.header(key.as_str(), crate::interpolation::render(value));
        }

        let query = request.query_pairs();
        if !query.is_empty() {
            req = req.query(&query);
        }

        if let Some(ref body) = request.body_json {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}
