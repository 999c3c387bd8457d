//! Decoder implementations
//!
//! Each decoder handles a specific response format.

use super::types::Decoder;
use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use flate2::read::GzDecoder;
use std::io::Read;
use std::sync::Arc;

// ============================================================================
// JSON Decoder
// ============================================================================

/// JSON decoder: a top-level array yields its items, an empty body yields `{}`
#[derive(Debug, Clone, Default)]
pub struct JsonDecoder;

impl JsonDecoder {
    /// Create a new JSON decoder
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for JsonDecoder {
    fn decode_bytes(&self, body: &[u8]) -> Result<Vec<JsonValue>> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(vec![JsonValue::Object(JsonObject::new())]);
        }
        let value: JsonValue = serde_json::from_slice(body).map_err(|e| Error::Decode {
            message: format!("Failed to parse JSON: {e}"),
        })?;
        match value {
            JsonValue::Array(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }
}

// ============================================================================
// JSONL Decoder
// ============================================================================

/// JSON Lines decoder (one JSON object per line)
#[derive(Debug, Clone, Default)]
pub struct JsonlDecoder;

impl JsonlDecoder {
    /// Create a new JSONL decoder
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for JsonlDecoder {
    fn decode_bytes(&self, body: &[u8]) -> Result<Vec<JsonValue>> {
        let text = std::str::from_utf8(body).map_err(|e| Error::Decode {
            message: format!("JSONL body is not valid UTF-8: {e}"),
        })?;
        let mut records = Vec::new();

        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: JsonValue = serde_json::from_str(line).map_err(|e| Error::Decode {
                message: format!("Failed to parse JSONL at line {}: {e}", line_num + 1),
            })?;

            records.push(value);
        }

        Ok(records)
    }
}

// ============================================================================
// Gzip Decoder
// ============================================================================

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Gunzips compressed bodies before handing them to an inner decoder.
/// Bodies without the gzip magic bytes pass through unchanged.
#[derive(Debug, Clone)]
pub struct GzipDecoder {
    inner: Arc<dyn Decoder>,
}

impl GzipDecoder {
    pub fn new(inner: Arc<dyn Decoder>) -> Self {
        Self { inner }
    }
}

impl Decoder for GzipDecoder {
    fn decode_bytes(&self, body: &[u8]) -> Result<Vec<JsonValue>> {
        if !body.starts_with(&GZIP_MAGIC) {
            return self.inner.decode_bytes(body);
        }
        let mut decompressed = Vec::new();
        GzDecoder::new(body)
            .read_to_end(&mut decompressed)
            .map_err(|e| Error::Decode {
                message: format!("Failed to decompress gzip body: {e}"),
            })?;
        self.inner.decode_bytes(&decompressed)
    }
}
