//! Adapter core: lifecycle boundary and operation dispatcher
//!
//! `AdapterCore` composes the cache store, dedup registry, retry policy,
//! breaker registry, metrics hub, event bus, and dependency checker around
//! a table of backend operation handlers. Every call through `execute`
//! gets the same resilience semantics regardless of which backend the
//! handler talks to.
//!
//! `execute` never returns `Err` — failures are normalized into the
//! structured [`ExecutionResult`]. One timing caveat is deliberate: the
//! losing branch of the timeout race is not cancelled. It keeps running,
//! still records attempt metrics, and still settles any coalesced
//! followers. Its late result is deliberately *not* written to the cache,
//! so a caller who saw a timeout can never be followed by a cache entry it
//! was told did not exist.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::breaker::{BreakerSnapshot, CircuitBreakerRegistry};
use crate::cache::CacheStore;
use crate::config::{AdapterConfig, AdapterConfigPatch};
use crate::dedup::{derive_key, DedupRegistry, DedupSlot, ExecutionOutcome};
use crate::dependency::{report_to_error, DependencyChecker, DependencyDescriptor, HealthProbe};
use crate::error::{AdapterError, ErrorBody, Result};
use crate::events::{AdapterEvent, EventBus, EventKind, HandlerId};
use crate::lifecycle::{AdapterState, Lifecycle};
use crate::metrics::{HealthStatus, MetricsHub, MetricsSnapshot, OperationMetric};
use crate::retry::RetryPolicy;

/// Backend seam implemented once per operation.
#[async_trait::async_trait]
pub trait OperationHandler: Send + Sync {
    /// Invoke the backend operation
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value>;

    /// External resource this operation targets. Operations sharing a
    /// resource share a circuit breaker; `None` opts out of breaking.
    fn resource(&self) -> Option<&str> {
        None
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Override of the configured request timeout, in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Metadata attached to every execution result
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetadata {
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub operation_id: String,
}

/// Structured result of one `execute` call
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<ErrorBody>,
    pub metadata: ExecutionMetadata,
}

/// Point-in-time view of the adapter
#[derive(Debug, Clone, Serialize)]
pub struct AdapterStatus {
    pub name: String,
    pub state: AdapterState,
    pub health: HealthStatus,
    pub operations: usize,
    pub in_flight: usize,
    pub cached_entries: usize,
    #[serde(skip)]
    pub breakers: Vec<BreakerSnapshot>,
}

/// What one pipeline run did, for metric shaping
#[derive(Debug, Clone, Copy, Default)]
struct CallTrace {
    cache_hit: bool,
    retry_count: u32,
    deduplicated: bool,
}

/// Builder wiring operation handlers and dependencies before construction.
///
/// The handler table is fixed at build time; `capabilities()` enumerates it.
pub struct AdapterBuilder {
    name: String,
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
    dependencies: DependencyChecker,
}

impl AdapterBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
            dependencies: DependencyChecker::new(),
        }
    }

    /// Register the handler for an operation name
    pub fn operation(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Declare an external dependency and its probe
    pub fn dependency(
        mut self,
        descriptor: DependencyDescriptor,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        self.dependencies.register(descriptor, probe);
        self
    }

    pub fn build(self) -> AdapterCore {
        let defaults = AdapterConfig::default();
        AdapterCore {
            name: self.name,
            handlers: self.handlers,
            dependencies: self.dependencies,
            lifecycle: Mutex::new(Lifecycle::new()),
            config: RwLock::new(defaults.clone()),
            retry_policy: RwLock::new(RetryPolicy::new(&defaults.retry)),
            cache: Arc::new(CacheStore::new(
                Duration::from_millis(defaults.cache.default_ttl_ms),
                defaults.cache.max_size,
            )),
            dedup: Arc::new(DedupRegistry::new()),
            breakers: Arc::new(CircuitBreakerRegistry::new(defaults.breaker.clone())),
            metrics: Arc::new(MetricsHub::new(
                Duration::from_millis(defaults.performance.metrics_retention_ms),
                Duration::from_millis(defaults.performance.percentile_window_ms),
            )),
            events: Arc::new(EventBus::new()),
            concurrency: RwLock::new(None),
            sweeps: Mutex::new(Vec::new()),
            op_counter: AtomicU64::new(0),
        }
    }
}

/// The execution core. One instance per configured resource family,
/// constructed explicitly via [`AdapterBuilder`]; all shared state lives in
/// instance fields, never in ambient globals.
pub struct AdapterCore {
    name: String,
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
    dependencies: DependencyChecker,
    lifecycle: Mutex<Lifecycle>,
    config: RwLock<AdapterConfig>,
    retry_policy: RwLock<RetryPolicy>,
    cache: Arc<CacheStore>,
    dedup: Arc<DedupRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<MetricsHub>,
    events: Arc<EventBus>,
    concurrency: RwLock<Option<Arc<Semaphore>>>,
    sweeps: Mutex<Vec<JoinHandle<()>>>,
    op_counter: AtomicU64,
}

impl AdapterCore {
    pub fn builder(name: impl Into<String>) -> AdapterBuilder {
        AdapterBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> AdapterState {
        self.lifecycle.lock().unwrap().state()
    }

    /// Whether the adapter accepts operations
    pub fn is_ready(&self) -> bool {
        self.state() == AdapterState::Running
    }

    /// Supported operation names, sorted
    pub fn capabilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Register an event handler
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&AdapterEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    /// Remove one event handler, or all handlers of a kind
    pub fn off(&self, kind: EventKind, id: Option<HandlerId>) {
        self.events.off(kind, id)
    }

    // ---- lifecycle boundary -------------------------------------------------

    /// Validate `config`, wire derived components, and spawn background
    /// sweeps. A failed initialization leaves the adapter in `Error` and
    /// returns the error.
    pub async fn initialize(&self, config: AdapterConfig) -> Result<()> {
        self.transition_and_emit(AdapterState::Initializing, EventKind::Initializing)?;

        if let Err(err) = config.validate() {
            self.fail_to_error(&err);
            return Err(err);
        }

        self.apply_config(&config);
        self.spawn_sweeps(Duration::from_millis(config.performance.sweep_interval_ms));
        *self.config.write().unwrap() = config;

        self.transition_and_emit(AdapterState::Initialized, EventKind::Initialized)?;
        tracing::info!(adapter = %self.name, "initialized");
        Ok(())
    }

    /// Run the dependency pre-flight gate and begin accepting operations.
    pub async fn start(&self) -> Result<()> {
        self.transition_and_emit(AdapterState::Starting, EventKind::Starting)?;

        if !self.dependencies.is_empty() {
            let report = self.dependencies.check_all().await;
            if let Some(err) = report_to_error(&report) {
                self.fail_to_error(&err);
                return Err(err);
            }
        }

        self.transition_and_emit(AdapterState::Running, EventKind::Started)?;
        tracing::info!(adapter = %self.name, "running");
        Ok(())
    }

    /// Drain the dedup registry and cache and stop accepting operations.
    ///
    /// Internal structures stay allocated, but restart is not guaranteed to
    /// be safe — treat an adapter as single-use per process. In-flight
    /// calls are not aborted; attached waiters still observe settlement.
    pub async fn stop(&self) -> Result<()> {
        self.transition_and_emit(AdapterState::Stopping, EventKind::Stopping)?;
        self.dedup.clear();
        self.cache.clear();
        self.transition_and_emit(AdapterState::Stopped, EventKind::Stopped)?;
        tracing::info!(adapter = %self.name, "stopped");
        Ok(())
    }

    /// Force-stop if running, clear every collection, cancel background
    /// sweeps, detach observers, and transition to the terminal state.
    pub async fn destroy(&self) -> Result<()> {
        if self.state() == AdapterState::Running {
            let _ = self.stop().await;
        }

        for sweep in self.sweeps.lock().unwrap().drain(..) {
            sweep.abort();
        }

        self.dedup.clear();
        self.cache.clear();
        self.breakers.clear();
        self.metrics.clear();

        self.lifecycle
            .lock()
            .unwrap()
            .transition_to(AdapterState::Destroyed)?;
        self.events.clear();
        tracing::info!(adapter = %self.name, "destroyed");
        Ok(())
    }

    /// Point-in-time status
    pub fn status(&self) -> AdapterStatus {
        AdapterStatus {
            name: self.name.clone(),
            state: self.state(),
            health: self.metrics.health_status(),
            operations: self.handlers.len(),
            in_flight: self.dedup.len(),
            cached_entries: self.cache.len(),
            breakers: self.breakers.snapshot(),
        }
    }

    /// Derived metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.dedup.stats().coalesced)
    }

    /// Cache effectiveness counters
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    /// Run dependency checks and report aggregate health.
    ///
    /// Always `false` outside the `Running` state, regardless of any other
    /// internal condition. A passing check resets the failure streak.
    pub async fn health_check(&self) -> bool {
        if self.state() != AdapterState::Running {
            return false;
        }
        let healthy = if self.dependencies.is_empty() {
            true
        } else {
            self.dependencies.check_all().await.healthy
        };
        if healthy {
            self.metrics.health_check_succeeded();
        }
        healthy
    }

    /// Apply a partial configuration update, validating the merged result
    /// first. Derived components pick the change up for subsequent calls.
    pub fn update_config(&self, patch: &AdapterConfigPatch) -> Result<()> {
        let state = self.state();
        if state == AdapterState::Destroyed {
            return Err(AdapterError::NotReady {
                state: state.as_str().to_string(),
            });
        }

        let merged = self.config.read().unwrap().merged(patch);
        merged.validate()?;
        self.apply_config(&merged);
        *self.config.write().unwrap() = merged;
        Ok(())
    }

    /// Current configuration (cloned)
    pub fn config(&self) -> AdapterConfig {
        self.config.read().unwrap().clone()
    }

    fn apply_config(&self, config: &AdapterConfig) {
        self.cache.reconfigure(
            Duration::from_millis(config.cache.default_ttl_ms),
            config.cache.max_size,
        );
        self.metrics.reconfigure(
            Duration::from_millis(config.performance.metrics_retention_ms),
            Duration::from_millis(config.performance.percentile_window_ms),
        );
        self.breakers.reconfigure(config.breaker.clone());
        *self.retry_policy.write().unwrap() = RetryPolicy::new(&config.retry);
        *self.concurrency.write().unwrap() = config
            .performance
            .max_concurrency
            .map(|permits| Arc::new(Semaphore::new(permits)));
    }

    fn transition_and_emit(&self, to: AdapterState, kind: EventKind) -> Result<()> {
        self.lifecycle.lock().unwrap().transition_to(to)?;
        self.events.emit(AdapterEvent::new(kind, &self.name));
        Ok(())
    }

    fn fail_to_error(&self, err: &AdapterError) {
        let _ = self
            .lifecycle
            .lock()
            .unwrap()
            .transition_to(AdapterState::Error);
        self.events
            .emit(AdapterEvent::new(EventKind::Error, &self.name).with_error(err.to_string()));
    }

    fn spawn_sweeps(&self, interval: Duration) {
        let cache = Arc::clone(&self.cache);
        let metrics = Arc::clone(&self.metrics);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                let pruned = metrics.prune();
                if purged > 0 || pruned > 0 {
                    tracing::debug!(purged, pruned, "background sweep");
                }
            }
        });
        self.sweeps.lock().unwrap().push(handle);
    }

    // ---- operation boundary -------------------------------------------------

    /// Execute a backend operation through the resilience pipeline.
    ///
    /// Failures are normalized into the result; this never returns `Err`.
    /// On timeout the pipeline keeps running detached — it settles any
    /// coalesced followers and records attempt metrics, but its late result
    /// is not written to the cache.
    pub async fn execute(
        &self,
        operation: &str,
        params: serde_json::Value,
        options: Option<ExecuteOptions>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let operation_id = format!(
            "{}-{}",
            self.name,
            self.op_counter.fetch_add(1, Ordering::Relaxed) + 1
        );

        // Step 1: lifecycle gate. No metric is recorded for calls rejected
        // here; a stopped adapter's health must not drift.
        let state = self.state();
        if state != AdapterState::Running {
            let err = AdapterError::NotReady {
                state: state.as_str().to_string(),
            };
            let result = self.finish(operation, &operation_id, started, err_outcome(&err), None);
            return result;
        }

        // Step 2: effective timeout
        let (timeout_ms, dedup_enabled, cacheable, key, metrics_enabled, retry_policy) = {
            let config = self.config.read().unwrap();
            let timeout_ms = options
                .as_ref()
                .and_then(|options| options.timeout_ms)
                .unwrap_or(config.performance.request_timeout_ms);
            let cacheable = config.cache.enabled
                && config
                    .cache
                    .cacheable_operations
                    .iter()
                    .any(|name| name == operation);
            let key = derive_key(&config.cache.key_prefix, operation, &params);
            (
                timeout_ms,
                config.performance.enable_request_deduplication,
                cacheable,
                key,
                config.performance.enable_metrics_collection,
                self.retry_policy.read().unwrap().clone(),
            )
        };

        let Some(handler) = self.handlers.get(operation).map(Arc::clone) else {
            let err = AdapterError::UnknownOperation(operation.to_string());
            return self.finish(
                operation,
                &operation_id,
                started,
                err_outcome(&err),
                metrics_enabled.then(CallTrace::default),
            );
        };

        // Steps 3-4: race the pipeline against the timer. The pipeline is
        // spawned so a timer win leaves it running to completion.
        let suppress_cache = Arc::new(AtomicBool::new(false));
        let pipeline = PipelineContext {
            operation: operation.to_string(),
            params,
            key,
            handler,
            cacheable,
            dedup_enabled,
            metrics_enabled,
            retry_policy,
            cache: Arc::clone(&self.cache),
            dedup: Arc::clone(&self.dedup),
            breakers: Arc::clone(&self.breakers),
            metrics: Arc::clone(&self.metrics),
            concurrency: self.concurrency.read().unwrap().clone(),
            suppress_cache: Arc::clone(&suppress_cache),
        };
        let task = tokio::spawn(pipeline.run());

        let (outcome, trace) =
            match tokio::time::timeout(Duration::from_millis(timeout_ms), task).await {
                Ok(Ok((outcome, trace))) => (outcome, trace),
                Ok(Err(join_err)) => {
                    // A panicking handler is a backend defect; surface it
                    // as a backend failure rather than poisoning the core.
                    let err = AdapterError::backend(format!("handler aborted: {join_err}"));
                    (err_outcome(&err), CallTrace::default())
                }
                Err(_elapsed) => {
                    suppress_cache.store(true, Ordering::SeqCst);
                    let err = AdapterError::Timeout {
                        operation: operation.to_string(),
                        timeout_ms,
                    };
                    tracing::warn!(operation, timeout_ms, "operation timed out");
                    (err_outcome(&err), CallTrace::default())
                }
            };

        // Steps 5-6: terminal metric and operation event
        self.finish(
            operation,
            &operation_id,
            started,
            outcome,
            metrics_enabled.then_some(trace),
        )
    }

    /// Record the terminal metric (when enabled), emit the operation event,
    /// and shape the structured result.
    fn finish(
        &self,
        operation: &str,
        operation_id: &str,
        started: Instant,
        outcome: ExecutionOutcome,
        trace: Option<CallTrace>,
    ) -> ExecutionResult {
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(trace) = trace {
            let metric_duration = if trace.cache_hit { 0 } else { duration_ms };
            let mut metric =
                OperationMetric::new(operation, metric_duration, outcome.success)
                    .with_retry_count(trace.retry_count);
            if trace.cache_hit {
                metric = metric.with_cache_hit();
            }
            self.metrics.record(&metric);
        }

        self.events.emit(
            AdapterEvent::new(EventKind::Operation, &self.name).with_data(serde_json::json!({
                "operation": operation,
                "operation_id": operation_id,
                "success": outcome.success,
                "duration_ms": duration_ms,
                "cache_hit": trace.map(|trace| trace.cache_hit).unwrap_or(false),
                "deduplicated": trace.map(|trace| trace.deduplicated).unwrap_or(false),
            })),
        );

        ExecutionResult {
            success: outcome.success,
            data: outcome.data,
            error: outcome.error,
            metadata: ExecutionMetadata {
                duration_ms,
                timestamp: Utc::now(),
                operation_id: operation_id.to_string(),
            },
        }
    }
}

fn err_outcome(err: &AdapterError) -> ExecutionOutcome {
    ExecutionOutcome::err(ErrorBody::from(err))
}

/// Everything one pipeline run needs, detached from the adapter so a
/// timed-out run can keep going after the caller has returned.
struct PipelineContext {
    operation: String,
    params: serde_json::Value,
    key: String,
    handler: Arc<dyn OperationHandler>,
    cacheable: bool,
    dedup_enabled: bool,
    metrics_enabled: bool,
    retry_policy: RetryPolicy,
    cache: Arc<CacheStore>,
    dedup: Arc<DedupRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<MetricsHub>,
    concurrency: Option<Arc<Semaphore>>,
    suppress_cache: Arc<AtomicBool>,
}

impl PipelineContext {
    async fn run(self) -> (ExecutionOutcome, CallTrace) {
        if !self.dedup_enabled {
            return self.invoke().await;
        }

        match self.dedup.begin(&self.key) {
            DedupSlot::Follower(mut rx) => match rx.recv().await {
                Ok(outcome) => (
                    outcome,
                    CallTrace {
                        deduplicated: true,
                        ..CallTrace::default()
                    },
                ),
                Err(_) => {
                    // Leader vanished without settling (can only happen if
                    // its task was aborted). Surfaced as a backend failure.
                    let err =
                        AdapterError::backend("coalesced call abandoned before settlement");
                    (err_outcome(&err), CallTrace::default())
                }
            },
            DedupSlot::Leader(handle) => {
                let (outcome, trace) = self.invoke().await;
                self.dedup.settle(handle, &outcome);
                (outcome, trace)
            }
        }
    }

    /// Cache lookup → breaker gate → retry-wrapped backend call → cache
    /// write. Runs exactly once per dedup key at a time.
    async fn invoke(&self) -> (ExecutionOutcome, CallTrace) {
        if self.cacheable {
            if let Some(data) = self.cache.get(&self.key) {
                return (
                    ExecutionOutcome::ok(data),
                    CallTrace {
                        cache_hit: true,
                        ..CallTrace::default()
                    },
                );
            }
        }

        let resource = self.handler.resource().map(str::to_string);
        if let Some(resource) = &resource {
            if let Err(err) = self.breakers.check(resource) {
                return (err_outcome(&err), CallTrace::default());
            }
        }

        // Concurrency cap applies to real backend invocations only
        let _permit = match &self.concurrency {
            Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => None,
            },
            None => None,
        };

        let mut attempt: u32 = 1;
        let result = loop {
            let attempt_started = Instant::now();
            match self.handler.call(self.params.clone()).await {
                Ok(data) => break Ok(data),
                Err(err) => {
                    if !self.retry_policy.should_retry(&self.operation, attempt, &err) {
                        break Err(err);
                    }
                    if self.metrics_enabled {
                        self.metrics.record_attempt(
                            &OperationMetric::new(
                                &self.operation,
                                attempt_started.elapsed().as_millis() as u64,
                                false,
                            )
                            .with_retry_count(attempt),
                        );
                    }
                    let delay = self.retry_policy.delay_for(attempt);
                    tracing::debug!(
                        operation = %self.operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        let trace = CallTrace {
            retry_count: attempt - 1,
            ..CallTrace::default()
        };

        match result {
            Ok(data) => {
                if let Some(resource) = &resource {
                    self.breakers.record_success(resource);
                }
                if self.cacheable && !self.suppress_cache.load(Ordering::SeqCst) {
                    self.cache.set(&self.key, data.clone());
                }
                (ExecutionOutcome::ok(data), trace)
            }
            Err(err) => {
                // Breaker rejections are policy blocks, not failed calls;
                // only settled failures feed the streak.
                if let Some(resource) = &resource {
                    if !matches!(err, AdapterError::CircuitOpen { .. }) {
                        self.breakers.record_failure(resource);
                    }
                }
                (err_outcome(&err), trace)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    /// Handler returning a canned value after an optional delay
    struct FixedHandler {
        value: serde_json::Value,
        delay: Duration,
        calls: AtomicU32,
        resource: Option<String>,
    }

    impl FixedHandler {
        fn new(value: serde_json::Value) -> Self {
            Self {
                value,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
                resource: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl OperationHandler for FixedHandler {
        async fn call(&self, _params: serde_json::Value) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.value.clone())
        }

        fn resource(&self) -> Option<&str> {
            self.resource.as_deref()
        }
    }

    /// Handler that always fails
    struct FailingHandler {
        calls: AtomicU32,
        resource: Option<String>,
    }

    impl FailingHandler {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                resource: None,
            }
        }

        fn with_resource(mut self, resource: &str) -> Self {
            self.resource = Some(resource.to_string());
            self
        }
    }

    #[async_trait::async_trait]
    impl OperationHandler for FailingHandler {
        async fn call(&self, _params: serde_json::Value) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AdapterError::backend("backend unavailable"))
        }

        fn resource(&self) -> Option<&str> {
            self.resource.as_deref()
        }
    }

    async fn running_adapter(handler: Arc<dyn OperationHandler>) -> AdapterCore {
        let adapter = AdapterCore::builder("test").operation("fetch", handler).build();
        adapter.initialize(AdapterConfig::default()).await.unwrap();
        adapter.start().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_execute_success_shape() {
        let handler = Arc::new(FixedHandler::new(json!({"answer": 42})));
        let adapter = running_adapter(handler).await;

        let result = adapter.execute("fetch", json!({}), None).await;
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"answer": 42})));
        assert!(result.error.is_none());
        assert!(result.metadata.operation_id.starts_with("test-"));
    }

    #[tokio::test]
    async fn test_execute_not_ready_before_start() {
        let adapter = AdapterCore::builder("test")
            .operation("fetch", Arc::new(FixedHandler::new(json!(null))))
            .build();
        adapter.initialize(AdapterConfig::default()).await.unwrap();

        let result = adapter.execute("fetch", json!({}), None).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, "NotReadyError");
        // Rejected calls leave no metric behind
        assert_eq!(adapter.metrics().total_operations, 0);
    }

    #[tokio::test]
    async fn test_execute_unknown_operation() {
        let adapter = running_adapter(Arc::new(FixedHandler::new(json!(null)))).await;
        let result = adapter.execute("mystery", json!({}), None).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, "UnknownOperationError");
    }

    #[tokio::test]
    async fn test_execute_timeout_wins_race() {
        let handler =
            Arc::new(FixedHandler::new(json!("slow")).with_delay(Duration::from_millis(200)));
        let adapter = running_adapter(handler).await;

        let started = Instant::now();
        let result = adapter
            .execute(
                "fetch",
                json!({}),
                Some(ExecuteOptions {
                    timeout_ms: Some(50),
                }),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, "TimeoutError");
        // Returned near the deadline, not after the backend finished
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_backend_error_normalized() {
        let adapter = running_adapter(Arc::new(FailingHandler::new())).await;
        let result = adapter.execute("fetch", json!({}), None).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.code, "BackendError");
        assert!(error.message.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_capabilities_sorted() {
        let adapter = AdapterCore::builder("test")
            .operation("zeta", Arc::new(FixedHandler::new(json!(null))))
            .operation("alpha", Arc::new(FixedHandler::new(json!(null))))
            .build();
        assert_eq!(adapter.capabilities(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_lifecycle_gating_and_destroy() {
        let adapter = running_adapter(Arc::new(FixedHandler::new(json!(null)))).await;
        assert!(adapter.is_ready());

        adapter.stop().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Stopped);
        assert!(!adapter.is_ready());

        adapter.destroy().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Destroyed);

        // Everything is rejected now
        let result = adapter.execute("fetch", json!({}), None).await;
        assert!(!result.success);
        assert!(adapter.update_config(&AdapterConfigPatch::default()).is_err());
        assert!(!adapter.health_check().await);
    }

    #[tokio::test]
    async fn test_initialize_rejects_bad_config() {
        let adapter = AdapterCore::builder("test").build();
        let mut config = AdapterConfig::default();
        config.retry.max_attempts = 0;

        let err = adapter.initialize(config).await.unwrap_err();
        assert_eq!(err.code(), "ConfigurationError");
        assert_eq!(adapter.state(), AdapterState::Error);
    }

    #[tokio::test]
    async fn test_health_check_false_unless_running() {
        let adapter = AdapterCore::builder("test").build();
        assert!(!adapter.health_check().await);

        adapter.initialize(AdapterConfig::default()).await.unwrap();
        assert!(!adapter.health_check().await);

        adapter.start().await.unwrap();
        assert!(adapter.health_check().await);

        adapter.stop().await.unwrap();
        assert!(!adapter.health_check().await);
    }

    #[tokio::test]
    async fn test_breaker_trips_through_execute() {
        let handler = Arc::new(FailingHandler::new().with_resource("docs"));
        let adapter = AdapterCore::builder("test")
            .operation("fetch", handler.clone())
            .build();
        let mut config = AdapterConfig::default();
        config.breaker.failure_threshold = 3;
        adapter.initialize(config).await.unwrap();
        adapter.start().await.unwrap();

        for _ in 0..3 {
            let result = adapter.execute("fetch", json!({}), None).await;
            assert_eq!(result.error.unwrap().code, "BackendError");
        }

        // Breaker is open now: rejected without touching the backend
        let calls_before = handler.calls.load(Ordering::SeqCst);
        let result = adapter.execute("fetch", json!({}), None).await;
        assert_eq!(result.error.unwrap().code, "CircuitOpenError");
        assert_eq!(handler.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn test_operation_event_emitted() {
        let adapter = running_adapter(Arc::new(FixedHandler::new(json!(null)))).await;
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);
        adapter.on(EventKind::Operation, move |event| {
            assert_eq!(event.data.as_ref().unwrap()["operation"], "fetch");
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        adapter.execute("fetch", json!({}), None).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_config_applies_to_next_call() {
        let handler = Arc::new(FixedHandler::new(json!(1)));
        let adapter = running_adapter(handler.clone()).await;

        // Allow-list "fetch" for caching via a patch
        let mut cache = adapter.config().cache;
        cache.cacheable_operations = vec!["fetch".to_string()];
        adapter
            .update_config(&AdapterConfigPatch {
                cache: Some(cache),
                ..Default::default()
            })
            .unwrap();

        adapter.execute("fetch", json!({}), None).await;
        adapter.execute("fetch", json!({}), None).await;
        assert_eq!(handler.calls(), 1); // second call was a cache hit
    }
}
