//! Configuration types for the adapter core
//!
//! All sections and fields are optional on the wire; missing values fall
//! back to the documented defaults. `AdapterConfig::validate` runs at
//! initialize/update time and fails fast with a `Configuration` error.

use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_ttl_ms() -> u64 {
    300_000
}

fn default_max_size() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_short_timeout_floor_ms() -> u64 {
    5000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    60_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_metrics_retention_ms() -> u64 {
    3_600_000
}

fn default_percentile_window_ms() -> u64 {
    300_000
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_strategy() -> String {
    "memory".to_string()
}

/// Cache behavior for allow-listed operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable response caching
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Storage strategy. Only "memory" is supported; persistence is out of
    /// scope.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Time-to-live applied to stored entries, in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Maximum number of entries before an eviction pass runs
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Prefix prepended to every derived cache/dedup key
    #[serde(default)]
    pub key_prefix: String,

    /// Operations allowed to participate in caching. Mutation-style
    /// operations stay off this list to avoid staleness.
    #[serde(default)]
    pub cacheable_operations: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: default_strategy(),
            default_ttl_ms: default_ttl_ms(),
            max_size: default_max_size(),
            key_prefix: String::new(),
            cacheable_operations: Vec::new(),
        }
    }
}

/// Retry behavior for transient backend failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Enable retries
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Total attempt budget per logical call (first attempt included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Exponential backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Base backoff unit in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Operations eligible for retry
    #[serde(default)]
    pub retryable_operations: Vec<String>,

    /// Timeouts configured below this floor are never retried. Prevents
    /// retry storms on intentionally tight deadlines.
    #[serde(default = "default_short_timeout_floor_ms")]
    pub short_timeout_floor_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
            base_delay_ms: default_base_delay_ms(),
            retryable_operations: Vec::new(),
            short_timeout_floor_ms: default_short_timeout_floor_ms(),
        }
    }
}

/// Circuit breaker thresholds, shared by every resource-scoped breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failed calls before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the breaker stays open before admitting a half-open trial,
    /// in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Dispatcher-level performance knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Coalesce concurrent identical in-flight calls
    #[serde(default = "default_true")]
    pub enable_request_deduplication: bool,

    /// Cap on concurrent backend invocations (`None` = unbounded)
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Default per-operation timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Record per-operation metrics
    #[serde(default = "default_true")]
    pub enable_metrics_collection: bool,

    /// Metrics older than this are pruned, in milliseconds
    #[serde(default = "default_metrics_retention_ms")]
    pub metrics_retention_ms: u64,

    /// Window used for p95/p99 and throughput, in milliseconds
    #[serde(default = "default_percentile_window_ms")]
    pub percentile_window_ms: u64,

    /// Interval of the background cache/metrics sweeps, in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enable_request_deduplication: true,
            max_concurrency: None,
            request_timeout_ms: default_request_timeout_ms(),
            enable_metrics_collection: true,
            metrics_retention_ms: default_metrics_retention_ms(),
            percentile_window_ms: default_percentile_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

/// Top-level adapter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,
}

impl AdapterConfig {
    /// Validate the configuration, failing fast on unusable values.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(AdapterError::Configuration(
                "cache.max_size must be at least 1".to_string(),
            ));
        }
        if self.cache.default_ttl_ms == 0 {
            return Err(AdapterError::Configuration(
                "cache.default_ttl_ms must be non-zero".to_string(),
            ));
        }
        if self.cache.strategy != "memory" {
            return Err(AdapterError::Configuration(format!(
                "unsupported cache.strategy '{}'",
                self.cache.strategy
            )));
        }
        if self.performance.max_concurrency == Some(0) {
            return Err(AdapterError::Configuration(
                "performance.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AdapterError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(AdapterError::Configuration(format!(
                "retry.backoff_multiplier must be >= 1.0 (got {})",
                self.retry.backoff_multiplier
            )));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(AdapterError::Configuration(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.performance.request_timeout_ms == 0 {
            return Err(AdapterError::Configuration(
                "performance.request_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.performance.sweep_interval_ms == 0 {
            return Err(AdapterError::Configuration(
                "performance.sweep_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a partial update, returning the merged configuration.
    pub fn merged(&self, patch: &AdapterConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(cache) = &patch.cache {
            next.cache = cache.clone();
        }
        if let Some(retry) = &patch.retry {
            next.retry = retry.clone();
        }
        if let Some(breaker) = &patch.breaker {
            next.breaker = breaker.clone();
        }
        if let Some(performance) = &patch.performance {
            next.performance = performance.clone();
        }
        next
    }
}

/// Partial configuration update. Sections left as `None` keep their
/// current values; a present section replaces its counterpart wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfigPatch {
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[serde(default)]
    pub breaker: Option<BreakerConfig>,

    #[serde(default)]
    pub performance: Option<PerformanceConfig>,
}
