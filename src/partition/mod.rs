//! Partition routing module
//!
//! Supports: Single partition, static List, Parent stream (substream)
//!
//! # Overview
//!
//! Partitions split a stream into independently readable chunks:
//! - Child resources that require a parent ID
//! - Static list of values (e.g., regions, accounts)
//! - IDs the user already knows, taken straight from the config

mod routers;
mod types;

pub use routers::{
    IdsFromConfig, ListPartitionRouter, ParentStreamConfig, SinglePartitionRouter,
    SubstreamPartitionRouter,
};
pub use types::{ParentStream, PartitionRouter, RecordStream, SliceStream};

#[cfg(test)]
mod tests;
