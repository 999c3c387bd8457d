//! State management module
//!
//! Handles the incoming state of a read and checkpoint persistence.
//! State is persisted between sync runs to enable incremental syncs.
//!
//! # Overview
//!
//! The state module provides:
//! - `State` - per-stream JSON state, parsed from STATE messages or a mapping
//! - `StateManager` - shared state tracking and atomic file persistence

mod manager;
mod types;

pub use manager::StateManager;
pub use types::State;
