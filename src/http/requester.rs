//! Requester: builds requests from manifest templates and sends them

use super::client::HttpClient;
use super::types::{HttpRequest, HttpResponse, RequestOptions};
use crate::error::{Error, Result};
use crate::error_handler::ErrorHandler;
use crate::interpolation::{
    InterpolatedMapping, InterpolatedString, InterpolatedValue, InterpolationContext,
};
use crate::slice::StreamSlice;
use crate::types::{JsonValue, Method};
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a requester needs to resolve one request
#[derive(Debug, Clone, Copy)]
pub struct RequestInput<'a> {
    pub stream_state: &'a JsonValue,
    pub slice: &'a StreamSlice,
    pub next_page_token: Option<&'a JsonValue>,
}

/// Sends one request for a slice and page
#[async_trait]
pub trait Requester: Send + Sync + std::fmt::Debug {
    /// Resolve and send a request. `options` are the merged router,
    /// paginator and cursor options; they win over the requester's own.
    /// Returns `None` when the error handler ignores the response.
    async fn send_request(
        &self,
        input: RequestInput<'_>,
        options: RequestOptions,
    ) -> Result<Option<HttpResponse>>;
}

// ============================================================================
// InterpolatedRequestOptionsProvider
// ============================================================================

/// Request parameters, headers and JSON body declared on the requester
#[derive(Debug, Clone, Default)]
pub struct InterpolatedRequestOptionsProvider {
    pub request_parameters: InterpolatedMapping,
    pub request_headers: InterpolatedMapping,
    pub request_body_json: Option<InterpolatedValue>,
}

impl InterpolatedRequestOptionsProvider {
    /// Evaluate all options for a request
    pub fn request_options(&self, ctx: &InterpolationContext<'_>) -> RequestOptions {
        let mut options = RequestOptions {
            params: self.request_parameters.eval(ctx),
            headers: self.request_headers.eval(ctx),
            ..RequestOptions::default()
        };
        if let Some(JsonValue::Object(body)) = self.request_body_json.as_ref().map(|b| b.eval(ctx))
        {
            options.body_json = body;
        }
        options
    }
}

// ============================================================================
// HttpRequester
// ============================================================================

/// Requester backed by an [`HttpClient`]
#[derive(Debug)]
pub struct HttpRequester {
    pub name: String,
    pub url_base: InterpolatedString,
    pub path: InterpolatedString,
    pub method: Method,
    pub options_provider: InterpolatedRequestOptionsProvider,
    pub error_handler: Arc<dyn ErrorHandler>,
    client: Arc<HttpClient>,
    config: Arc<JsonValue>,
    parameters: Arc<JsonValue>,
}

impl HttpRequester {
    pub fn new(
        name: impl Into<String>,
        url_base: InterpolatedString,
        path: InterpolatedString,
        client: Arc<HttpClient>,
        error_handler: Arc<dyn ErrorHandler>,
        config: Arc<JsonValue>,
        parameters: Arc<JsonValue>,
    ) -> Self {
        Self {
            name: name.into(),
            url_base,
            path,
            method: Method::GET,
            options_provider: InterpolatedRequestOptionsProvider::default(),
            error_handler,
            client,
            config,
            parameters,
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_options_provider(mut self, provider: InterpolatedRequestOptionsProvider) -> Self {
        self.options_provider = provider;
        self
    }

    /// Resolve the request for a slice and page
    pub fn build_request(&self, input: RequestInput<'_>, options: RequestOptions) -> Result<HttpRequest> {
        let ctx = InterpolationContext::new(&self.config)
            .with_parameters(&self.parameters)
            .with_stream_state(input.stream_state)
            .with_slice(input.slice)
            .with_next_page_token(input.next_page_token);

        let mut merged = self.options_provider.request_options(&ctx);
        merged.merge(options);

        let base = self.url_base.eval_string(&ctx);
        let url = match merged.path.take() {
            Some(path) if is_absolute(&path) => path,
            Some(path) => join_url(&base, &path),
            None => join_url(&base, &self.path.eval_string(&ctx)),
        };
        if !is_absolute(&url) {
            return Err(Error::config(format!(
                "Stream '{}' resolved a relative URL '{url}'; check url_base",
                self.name
            )));
        }
        url::Url::parse(&url)?;

        let body_json = if merged.body_json.is_empty() {
            None
        } else {
            Some(JsonValue::Object(std::mem::take(&mut merged.body_json)))
        };

        Ok(HttpRequest {
            method: self.method,
            url,
            params: merged.params,
            headers: merged.headers,
            body_json,
        })
    }
}

#[async_trait]
impl Requester for HttpRequester {
    async fn send_request(
        &self,
        input: RequestInput<'_>,
        options: RequestOptions,
    ) -> Result<Option<HttpResponse>> {
        let request = self.build_request(input, options)?;
        self.client.send(&request, self.error_handler.as_ref()).await
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Join a base URL and a path with exactly one slash between them
fn join_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{path}", base.trim_end_matches('/'))
}
