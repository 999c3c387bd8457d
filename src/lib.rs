// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Declarative Connector Development Kit
//!
//! A Rust-native engine that reads records from HTTP APIs described by a
//! declarative manifest.
//!
//! ## Features
//!
//! - **Interpolation**: `{{ ... }}` templates over config, parameters, slices and responses
//! - **Pagination**: Page increment, offset increment and cursor strategies
//! - **Partitioning**: List and parent/child (substream) routers
//! - **Incremental Sync**: Cursors with datetime windows, per-partition state and checkpoints
//! - **Concurrent Reads**: Partitions read by a bounded worker pool through one bounded queue
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use declarative_cdk::{load_manifest, ComponentFactory, InMemoryMessageRepository, LogLevel};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> declarative_cdk::Result<()> {
//!     let manifest = load_manifest("manifest.yaml")?;
//!     let config = serde_json::json!({ "api_key": "..." });
//!     let repository = Arc::new(InMemoryMessageRepository::new(LogLevel::Info));
//!
//!     let factory = ComponentFactory::new(&manifest, config, repository)?;
//!     let mut messages = factory.create_source()?.read(factory.create_streams()?);
//!     while let Some(message) = messages.next().await {
//!         println!("{}", message?.to_json_line()?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            Manifest ──► ComponentFactory ──► Streams            │
//! │   ConcurrentSource::read(streams) → RECORD / STATE / TRACE      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │ Template │   HTTP    │   Paginate    │ Partition │   Cursor    │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ Parser   │ Requester │ Page number   │ Single    │ Concurrent  │
//! │ Context  │ Retry     │ Offset        │ List      │ Per-partition│
//! │ Macros   │ Rate Limit│ Cursor        │ Substream │ Final state │
//! │          │ Backoff   │ Stop condition│           │ Windows     │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the CDK
pub mod error;

/// Common types and type aliases
pub mod types;

/// Stream slices
pub mod slice;

/// Records read from a stream
pub mod record;

/// Datetime parsing and formatting
pub mod datetime;

/// Template interpolation
pub mod interpolation;

/// HTTP client, requester and request options
pub mod http;

/// Response classification and backoff
pub mod error_handler;

/// Response decoders and record extraction
pub mod decode;

/// Protocol messages and the message repository
pub mod message;

/// State management and checkpointing
pub mod state;

/// Pagination strategies
pub mod pagination;

/// Partition routing
pub mod partition;

/// Incremental cursors
pub mod cursor;

/// Page-by-page record retrieval
pub mod retriever;

/// Declarative streams
pub mod stream;

/// Concurrent read engine
pub mod engine;

/// Engine configuration
pub mod config;

/// Manifest loader and component factory
pub mod loader;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use engine::{ConcurrentSource, MessageStream};
pub use loader::{load_manifest, load_manifest_from_str, ComponentFactory, ManifestDefinition};
pub use message::{InMemoryMessageRepository, Message, MessageRepository};
pub use state::{State, StateManager};
pub use stream::DeclarativeStream;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
