//! Relay Core: resilient execution core for backend adapters
//!
//! # Overview
//!
//! This crate is the execution core the platform's backend adapters are
//! built on. It wraps arbitrary calls to downstream subsystems (document
//! stores, dashboards, protocol adapters) with one consistent set of
//! resilience semantics:
//!
//! - **Caching**: TTL- and size-bounded response cache for allow-listed
//!   read operations, with recency+frequency eviction
//! - **Request deduplication**: concurrent identical calls coalesce onto a
//!   single backend invocation
//! - **Bounded retries**: allow-listed operations retry transient failures
//!   with exponential backoff
//! - **Circuit breaking**: per-resource failure streaks gate calls to
//!   consistently failing targets
//! - **Typed lifecycle**: initialize → start → running → stop → destroy,
//!   with pre-flight dependency health checks
//! - **Metrics & health**: rolling latency percentiles, throughput, cache
//!   and dedup rates, categorical health scoring
//!
//! # Key Principles
//!
//! The core knows nothing about concrete backends. Operations are supplied
//! as [`OperationHandler`] implementations; dependencies as
//! [`HealthProbe`]s. Everything an adapter shares across concurrent calls
//! (cache, dedup registry, breakers, metrics) is owned by the
//! [`AdapterCore`] instance — never ambient globals.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            execute(op, params)           │
//! └─────────────┬────────────────────────────┘
//!               │ lifecycle gate (Running?)
//!               ▼
//! ┌──────────────────────────────────────────┐
//! │        Timeout race (detached task)      │
//! └─────────────┬────────────────────────────┘
//!               ▼
//! ┌──────────────────────────────────────────┐
//! │        Dedup registry                    │  ← coalesce identical calls
//! └─────────────┬────────────────────────────┘
//!               ▼
//! ┌──────────────────────────────────────────┐
//! │        Cache store (if allow-listed)     │  ← TTL + scored eviction
//! └─────────────┬────────────────────────────┘
//!               ▼
//! ┌──────────────────────────────────────────┐
//! │        Circuit breaker gate              │  ← per-resource
//! └─────────────┬────────────────────────────┘
//!               ▼
//! ┌──────────────────────────────────────────┐
//! │        Retry loop → backend handler      │  ← exponential backoff
//! └──────────────────────────────────────────┘
//!
//!  Continuously running:
//!   Cache sweep    → purge expired entries
//!   Metrics sweep  → prune aged samples
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use relay_core::{AdapterConfig, AdapterCore, AdapterError, OperationHandler};
//! use std::sync::Arc;
//!
//! struct StatusHandler;
//!
//! #[async_trait::async_trait]
//! impl OperationHandler for StatusHandler {
//!     async fn call(&self, _params: serde_json::Value)
//!         -> Result<serde_json::Value, AdapterError>
//!     {
//!         Ok(serde_json::json!({"status": "ok"}))
//!     }
//!
//!     fn resource(&self) -> Option<&str> {
//!         Some("status-endpoint")
//!     }
//! }
//!
//! # async fn example() -> Result<(), AdapterError> {
//! let adapter = AdapterCore::builder("dashboard")
//!     .operation("system-status", Arc::new(StatusHandler))
//!     .build();
//!
//! adapter.initialize(AdapterConfig::default()).await?;
//! adapter.start().await?;
//!
//! let result = adapter
//!     .execute("system-status", serde_json::json!({}), None)
//!     .await;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod dependency;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod retry;

// Re-export main types for convenience
pub use adapter::{
    AdapterBuilder, AdapterCore, AdapterStatus, ExecuteOptions, ExecutionMetadata,
    ExecutionResult, OperationHandler,
};
pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreakerRegistry};
pub use cache::{CacheStats, CacheStore};
pub use config::{
    AdapterConfig, AdapterConfigPatch, BreakerConfig, CacheConfig, PerformanceConfig, RetryConfig,
};
pub use dedup::{derive_key, DedupRegistry, DedupStats, ExecutionOutcome};
pub use dependency::{
    DependencyChecker, DependencyCheckResult, DependencyDescriptor, DependencyReport, HealthProbe,
};
pub use error::{AdapterError, ErrorBody, Result};
pub use events::{AdapterEvent, EventBus, EventKind, HandlerId};
pub use lifecycle::{AdapterState, Lifecycle, LifecycleTransition};
pub use metrics::{HealthStatus, MetricsHub, MetricsSnapshot, OperationMetric};
pub use retry::RetryPolicy;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use relay_core::prelude::*;
/// ```
pub mod prelude {
    pub use super::adapter::{AdapterCore, ExecuteOptions, ExecutionResult, OperationHandler};
    pub use super::config::{AdapterConfig, AdapterConfigPatch};
    pub use super::dependency::{DependencyDescriptor, HealthProbe};
    pub use super::error::{AdapterError, ErrorBody, Result};
    pub use super::events::EventKind;
    pub use super::lifecycle::AdapterState;
    pub use super::metrics::HealthStatus;
}
