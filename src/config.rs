//! Engine configuration
//!
//! Settings that shape how a read runs rather than what it reads: worker
//! pool size, queue capacity and HTTP client defaults. Manifests carry them
//! under `concurrency_level` and `http`.

use crate::error::{Error, Result};
use crate::http::{HttpClientConfig, RateLimiterConfig};
use crate::interpolation::{InterpolatedString, InterpolationContext};
use crate::types::JsonValue;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Workers used when a manifest declares no concurrency level
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Items the partition queue holds before producers wait
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50_000;

// ============================================================================
// Concurrency
// ============================================================================

/// Worker count: a number, or a template evaluated against the user config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConcurrencyLevel {
    Fixed(u64),
    Interpolated(String),
}

impl Default for ConcurrencyLevel {
    fn default() -> Self {
        Self::Fixed(DEFAULT_CONCURRENCY as u64)
    }
}

/// Concurrency settings of a read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default)]
    pub default_concurrency: ConcurrencyLevel,

    /// Upper bound for an interpolated concurrency level
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            default_concurrency: ConcurrencyLevel::default(),
            max_concurrency: None,
            max_queue_size: default_max_queue_size(),
        }
    }
}

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

impl ConcurrencyConfig {
    /// A fixed number of workers
    pub fn fixed(workers: usize) -> Self {
        Self {
            default_concurrency: ConcurrencyLevel::Fixed(workers as u64),
            ..Self::default()
        }
    }

    /// Number of workers for a read with the given user config
    ///
    /// An interpolated level must evaluate to an integer and, when it reads
    /// the user config, `max_concurrency` is required.
    pub fn resolve(&self, config: &JsonValue) -> Result<usize> {
        let workers = match &self.default_concurrency {
            ConcurrencyLevel::Fixed(n) => *n as usize,
            ConcurrencyLevel::Interpolated(template) => {
                if template.contains("config") && self.max_concurrency.is_none() {
                    return Err(Error::invalid_value(
                        "concurrency_level",
                        "max_concurrency is required when default_concurrency reads the config",
                    ));
                }
                let ctx = InterpolationContext::new(config);
                let evaluated = InterpolatedString::new(template.as_str())?
                    .eval_u64(&ctx, "default_concurrency")? as usize;
                self.max_concurrency
                    .map_or(evaluated, |max| evaluated.min(max))
            }
        };
        Ok(workers.max(1))
    }
}

// ============================================================================
// HTTP defaults
// ============================================================================

/// Defaults for the HTTP client shared by a manifest's streams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpDefaults {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Retries when a stream's error handler declares none
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default, skip_serializing)]
    pub rate_limit: Option<RateLimiterConfig>,
}

impl Default for HttpDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            max_retries: default_max_retries(),
            rate_limit: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

impl HttpDefaults {
    /// Client configuration for these defaults
    pub fn client_config(&self) -> HttpClientConfig {
        let config = HttpClientConfig::default().with_timeout(Duration::from_secs(self.timeout_seconds));
        match &self.rate_limit {
            Some(rate_limit) => config.with_rate_limit(rate_limit.clone()),
            None => config,
        }
    }
}
