//! HTTP request/response types and request option injection

use crate::error::Result;
use crate::interpolation::{render, InterpolatedString, InterpolationContext};
use crate::types::{JsonObject, JsonValue, Method};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

// ============================================================================
// Request / Response
// ============================================================================

/// A fully resolved outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: JsonObject,
    pub headers: JsonObject,
    pub body_json: Option<JsonValue>,
}

impl HttpRequest {
    /// Create a GET request for a URL
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            params: JsonObject::new(),
            headers: JsonObject::new(),
            body_json: None,
        }
    }

    /// Query parameters rendered as strings
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), render(v)))
            .collect()
    }
}

/// A received response with its body fully buffered
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: String,
}

impl HttpResponse {
    /// Create a response from parts
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            url: String::new(),
        }
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as (lossy) UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON, `None` when it is not JSON
    pub fn json(&self) -> Option<JsonValue> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Headers as a JSON object with lowercase names. A `link` header is
    /// parsed into `{rel: {"url": ..., "rel": ...}}` so templates can use
    /// `headers.link.next.url`.
    pub fn headers_json(&self) -> JsonValue {
        let mut map = JsonObject::new();
        for (name, value) in &self.headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            let name = name.as_str().to_lowercase();
            if name == "link" {
                map.insert(name, parse_link_header(value));
            } else {
                map.insert(name, JsonValue::String(value.to_string()));
            }
        }
        JsonValue::Object(map)
    }
}

/// Parse an RFC 8288 `Link` header into `{rel: {"url": url, "rel": rel}}`
pub fn parse_link_header(header: &str) -> JsonValue {
    let mut links = JsonObject::new();
    // Link header format: <url>; rel="next", <url>; rel="prev"
    for part in header.split(',') {
        let mut url = None;
        let mut rel = None;

        for segment in part.trim().split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(stripped) = segment.strip_prefix("rel=") {
                rel = Some(stripped.trim_matches('"').trim_matches('\''));
            }
        }

        if let (Some(u), Some(r)) = (url, rel) {
            let mut link = JsonObject::new();
            link.insert("url".into(), JsonValue::String(u.to_string()));
            link.insert("rel".into(), JsonValue::String(r.to_string()));
            links.insert(r.to_string(), JsonValue::Object(link));
        }
    }
    JsonValue::Object(links)
}

// ============================================================================
// Request options
// ============================================================================

/// Request parts contributed by a component
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub params: JsonObject,
    pub headers: JsonObject,
    pub body_json: JsonObject,
    /// Replaces the requester path (absolute URLs replace the whole URL)
    pub path: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
            && self.headers.is_empty()
            && self.body_json.is_empty()
            && self.path.is_none()
    }

    /// Merge `other` on top of `self`; keys in `other` win
    pub fn merge(&mut self, other: RequestOptions) {
        self.params.extend(other.params);
        self.headers.extend(other.headers);
        self.body_json.extend(other.body_json);
        if other.path.is_some() {
            self.path = other.path;
        }
    }

    /// Add a query parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Where a request option is injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectInto {
    RequestParameter,
    Header,
    #[serde(alias = "body_data")]
    BodyJson,
    Path,
}

/// Injects a single value into an outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOption {
    pub inject_into: InjectInto,
    field_name: Option<InterpolatedString>,
}

impl RequestOption {
    /// Create an option injected under `field_name`
    pub fn new(inject_into: InjectInto, field_name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            inject_into,
            field_name: Some(InterpolatedString::new(field_name)?),
        })
    }

    /// Create an option that replaces the request path
    pub fn path() -> Self {
        Self {
            inject_into: InjectInto::Path,
            field_name: None,
        }
    }

    /// Inject `value` into `options`; nulls are skipped
    pub fn inject(
        &self,
        value: &JsonValue,
        options: &mut RequestOptions,
        ctx: &InterpolationContext<'_>,
    ) {
        if value.is_null() {
            return;
        }
        let field = self
            .field_name
            .as_ref()
            .map(|f| f.eval_string(ctx))
            .unwrap_or_default();
        match self.inject_into {
            InjectInto::RequestParameter => {
                options.params.insert(field, value.clone());
            }
            InjectInto::Header => {
                options.headers.insert(field, JsonValue::String(render(value)));
            }
            InjectInto::BodyJson => {
                options.body_json.insert(field, value.clone());
            }
            InjectInto::Path => options.path = Some(render(value)),
        }
    }
}
