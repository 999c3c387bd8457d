//! Manifest loader module
//!
//! Parse declarative manifests and build streams from them.
//!
//! # Overview
//!
//! The loader module provides:
//! - `ManifestDefinition` - Declarative manifest
//! - `StreamDefinition` - Stream configuration
//! - YAML/JSON parsing with validation
//! - `ComponentFactory` - Builds runtime streams for a user config

mod factory;
mod parser;
mod types;

pub use factory::ComponentFactory;
pub use parser::{load_manifest, load_manifest_from_str, validate_manifest};
pub use types::{
    BackoffStrategyDefinition, DecoderDefinition, ErrorHandlerDefinition, ExtractorDefinition,
    IdsFromConfigDefinition, IncrementalSyncDefinition, ListValues, ManifestDefinition,
    NumberOrTemplate, PaginationStrategyDefinition, PaginatorDefinition, ParentStreamConfigDefinition,
    PartitionRouterDefinition, PrimaryKey, RecordFilterDefinition, RecordSelectorDefinition,
    RequestOptionDefinition, RequesterDefinition, ResponseFilterDefinition, RetrieverDefinition,
    StreamDefinition,
};

#[cfg(test)]
mod tests;
