//! Decoder and extractor traits

use crate::error::Result;
use crate::http::HttpResponse;
use crate::types::JsonValue;

/// Turns a response body into one or more JSON documents
pub trait Decoder: Send + Sync + std::fmt::Debug {
    /// Decode raw body bytes
    fn decode_bytes(&self, body: &[u8]) -> Result<Vec<JsonValue>>;

    /// Decode a response body
    fn decode(&self, response: &HttpResponse) -> Result<Vec<JsonValue>> {
        self.decode_bytes(&response.body)
    }
}

/// Pulls records out of a decoded document
pub trait RecordExtractor: Send + Sync + std::fmt::Debug {
    fn extract_records(&self, decoded: &JsonValue) -> Result<Vec<JsonValue>>;
}
