//! Response decoder module
//!
//! Supports: JSON, JSONL, gzip-compressed bodies
//!
//! # Overview
//!
//! Decoders turn response bodies into JSON documents. The record selector
//! then extracts records from each document at a configured field path and
//! applies the optional record filter.

mod decoders;
mod extractor;
mod types;

pub use decoders::{GzipDecoder, JsonDecoder, JsonlDecoder};
pub use extractor::{DpathExtractor, RecordFilter, RecordSelector};
pub use types::{Decoder, RecordExtractor};
