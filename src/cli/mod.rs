//! CLI module
//!
//! Command-line interface for running manifests.
//!
//! # Commands
//!
//! - `read` - Read streams, writing one JSON message per line to stdout
//! - `validate` - Parse and validate a manifest
//! - `streams` - List stream names and sync modes

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
