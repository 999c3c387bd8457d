//! Loader types
//!
//! Declarative manifest definition types. Components with more than one
//! implementation are tagged by `type`; everything else is a plain struct.

use crate::config::{ConcurrencyConfig, HttpDefaults};
use crate::error_handler::ResponseAction;
use crate::http::InjectInto;
use crate::types::{FailureType, JsonObject, JsonValue, Method};
use serde::{Deserialize, Serialize};

// ============================================================================
// Manifest Definition
// ============================================================================

/// Top-level manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ManifestDefinition {
    #[serde(default = "default_version")]
    pub version: String,
    /// Stream definitions, read in this order
    pub streams: Vec<StreamDefinition>,
    #[serde(default)]
    pub concurrency_level: ConcurrencyConfig,
    /// HTTP client settings shared by every stream
    #[serde(default)]
    pub http: HttpDefaults,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl ManifestDefinition {
    /// Stream definition by name
    pub fn stream(&self, name: &str) -> Option<&StreamDefinition> {
        self.streams.iter().find(|s| s.name == name)
    }
}

// ============================================================================
// Stream Definition
// ============================================================================

/// One declarative stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamDefinition {
    pub name: String,
    #[serde(default)]
    pub primary_key: PrimaryKey,
    /// Values available to templates as `parameters`
    #[serde(default, alias = "$parameters")]
    pub parameters: JsonObject,
    pub retriever: RetrieverDefinition,
    #[serde(default)]
    pub incremental_sync: Option<IncrementalSyncDefinition>,
}

/// A single field or a list of fields
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    #[default]
    None,
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKey {
    pub fn fields(&self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Single(field) => vec![field.clone()],
            Self::Composite(fields) => fields.clone(),
        }
    }
}

impl StreamDefinition {
    /// Parent streams read through a substream router
    pub fn parent_names(&self) -> Vec<&str> {
        match self.retriever.partition_router {
            Some(PartitionRouterDefinition::SubstreamPartitionRouter {
                ref parent_stream_configs,
                ..
            }) => parent_stream_configs
                .iter()
                .map(|p| p.stream.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Retriever Definition
// ============================================================================

/// How a stream's records are fetched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetrieverDefinition {
    pub requester: RequesterDefinition,
    #[serde(default)]
    pub record_selector: RecordSelectorDefinition,
    #[serde(default)]
    pub paginator: Option<PaginatorDefinition>,
    #[serde(default)]
    pub partition_router: Option<PartitionRouterDefinition>,
    #[serde(default)]
    pub decoder: DecoderDefinition,
    /// Send router and cursor options only with the first page of a slice
    #[serde(default)]
    pub ignore_stream_slicer_parameters_on_paginated_requests: bool,
}

/// HTTP request of a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RequesterDefinition {
    /// Base URL (template)
    pub url_base: String,
    /// Path appended to the base URL (template)
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub http_method: Method,
    #[serde(default)]
    pub request_parameters: JsonObject,
    #[serde(default)]
    pub request_headers: JsonObject,
    #[serde(default)]
    pub request_body_json: Option<JsonValue>,
    #[serde(default)]
    pub error_handler: Option<ErrorHandlerDefinition>,
}

/// Where records sit in a decoded response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecordSelectorDefinition {
    #[serde(default)]
    pub extractor: ExtractorDefinition,
    #[serde(default)]
    pub record_filter: Option<RecordFilterDefinition>,
}

/// Path of the records; empty means the whole document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractorDefinition {
    #[serde(default)]
    pub field_path: Vec<String>,
}

/// Keep records for which `condition` is truthy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFilterDefinition {
    pub condition: String,
}

// ============================================================================
// Decoder Definition
// ============================================================================

/// Response body format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecoderDefinition {
    #[default]
    #[serde(alias = "JsonDecoder")]
    Json,
    #[serde(alias = "JsonlDecoder")]
    Jsonl,
    /// Gzip-compressed body decoded by `decoder`
    #[serde(alias = "GzipDecoder")]
    Gzip {
        #[serde(default)]
        decoder: Box<DecoderDefinition>,
    },
}

// ============================================================================
// Request Option Definition
// ============================================================================

/// Where a value is injected into a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RequestOptionDefinition {
    pub inject_into: InjectInto,
    /// Parameter, header or body key; not used for `path`
    #[serde(default)]
    pub field_name: Option<String>,
}

// ============================================================================
// Paginator Definition
// ============================================================================

/// Paginator of a retriever
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaginatorDefinition {
    #[serde(alias = "DefaultPaginator")]
    DefaultPaginator {
        pagination_strategy: PaginationStrategyDefinition,
        #[serde(default)]
        page_token_option: Option<RequestOptionDefinition>,
        #[serde(default)]
        page_size_option: Option<RequestOptionDefinition>,
    },
    #[serde(alias = "NoPagination")]
    NoPagination,
}

/// How the next page token is computed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaginationStrategyDefinition {
    #[serde(alias = "PageIncrement")]
    PageIncrement {
        #[serde(default)]
        page_size: Option<u64>,
        #[serde(default)]
        start_from_page: u64,
        #[serde(default)]
        inject_on_first_request: bool,
        /// Path of the total page count in the response
        #[serde(default)]
        total_pages_path: Option<Vec<String>>,
    },
    #[serde(alias = "OffsetIncrement")]
    OffsetIncrement {
        #[serde(default)]
        page_size: Option<u64>,
        #[serde(default)]
        inject_on_first_request: bool,
    },
    #[serde(alias = "CursorPagination")]
    CursorPagination {
        /// Template of the next token
        cursor_value: String,
        #[serde(default)]
        stop_condition: Option<String>,
        #[serde(default)]
        page_size: Option<u64>,
    },
}

// ============================================================================
// Partition Router Definition
// ============================================================================

/// Partition router of a retriever
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionRouterDefinition {
    #[serde(alias = "ListPartitionRouter")]
    ListPartitionRouter {
        values: ListValues,
        cursor_field: String,
        #[serde(default)]
        request_option: Option<RequestOptionDefinition>,
    },
    #[serde(alias = "SubstreamPartitionRouter")]
    SubstreamPartitionRouter {
        parent_stream_configs: Vec<ParentStreamConfigDefinition>,
        #[serde(default)]
        ids_from_config: Option<IdsFromConfigDefinition>,
    },
}

/// Literal partition values, or a template evaluating to a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListValues {
    Literal(Vec<JsonValue>),
    Interpolated(String),
}

/// One parent of a substream router
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ParentStreamConfigDefinition {
    /// Name of a stream in the same manifest
    pub stream: String,
    /// Dotted path in the parent record
    pub parent_key: String,
    pub partition_field: String,
    #[serde(default)]
    pub request_option: Option<RequestOptionDefinition>,
    #[serde(default)]
    pub incremental_dependency: bool,
    #[serde(default)]
    pub extra_fields: Vec<String>,
}

/// Partition values listed in the user config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IdsFromConfigDefinition {
    pub config_path: String,
    pub partition_field: String,
}

// ============================================================================
// Incremental Sync Definition
// ============================================================================

/// Incremental cursor of a stream
///
/// Without `start_datetime` the cursor reads one unbounded range and keeps
/// the highest value seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IncrementalSyncDefinition {
    pub cursor_field: String,
    /// Start of the first window (template)
    #[serde(default)]
    pub start_datetime: Option<String>,
    #[serde(default)]
    pub end_datetime: Option<String>,
    #[serde(default)]
    pub datetime_format: Option<String>,
    /// Window size, e.g. `P1D`
    #[serde(default)]
    pub step: Option<String>,
    /// Smallest unit of the cursor value, required with `step`
    #[serde(default)]
    pub cursor_granularity: Option<String>,
    #[serde(default)]
    pub lookback_window: Option<String>,
    #[serde(default)]
    pub start_time_option: Option<RequestOptionDefinition>,
    #[serde(default)]
    pub end_time_option: Option<RequestOptionDefinition>,
    /// Records arrive newest first; stop paginating at the first synced one
    #[serde(default)]
    pub is_data_feed: bool,
    /// Partitions tracked before falling back to a global cursor
    #[serde(default)]
    pub max_partitions: Option<usize>,
}

// ============================================================================
// Error Handler Definition
// ============================================================================

/// Error handler of a requester
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorHandlerDefinition {
    #[serde(alias = "DefaultErrorHandler")]
    DefaultErrorHandler {
        #[serde(default)]
        max_retries: Option<u32>,
        /// Give up retrying after this many seconds
        #[serde(default)]
        max_time: Option<u64>,
        #[serde(default)]
        backoff_strategies: Vec<BackoffStrategyDefinition>,
        #[serde(default)]
        response_filters: Vec<ResponseFilterDefinition>,
    },
    #[serde(alias = "CompositeErrorHandler")]
    CompositeErrorHandler {
        error_handlers: Vec<ErrorHandlerDefinition>,
    },
}

/// Wait time between retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategyDefinition {
    #[serde(alias = "ExponentialBackoffStrategy")]
    ExponentialBackoffStrategy {
        #[serde(default = "default_backoff_factor")]
        factor: NumberOrTemplate,
    },
    #[serde(alias = "ConstantBackoffStrategy")]
    ConstantBackoffStrategy {
        backoff_time_in_seconds: NumberOrTemplate,
    },
    #[serde(alias = "WaitTimeFromHeader")]
    WaitTimeFromHeader {
        header: String,
        #[serde(default)]
        regex: Option<String>,
        #[serde(default)]
        max_waiting_time_in_seconds: Option<f64>,
    },
    #[serde(alias = "WaitUntilTimeFromHeader")]
    WaitUntilTimeFromHeader {
        header: String,
        #[serde(default)]
        regex: Option<String>,
        #[serde(default)]
        min_wait: Option<f64>,
    },
}

fn default_backoff_factor() -> NumberOrTemplate {
    NumberOrTemplate::Number(crate::error_handler::DEFAULT_BACKOFF_FACTOR)
}

/// A number, or a template evaluated against the config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrTemplate {
    Number(f64),
    Template(String),
}

/// Response classification rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResponseFilterDefinition {
    #[serde(default)]
    pub action: Option<ResponseAction>,
    #[serde(default)]
    pub failure_type: Option<FailureType>,
    #[serde(default)]
    pub http_codes: Vec<u16>,
    #[serde(default)]
    pub error_message_contains: Option<String>,
    /// Boolean template over `response` and `headers`
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}
