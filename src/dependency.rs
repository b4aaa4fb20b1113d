//! Declared-dependency health checking
//!
//! Adapters declare the external systems they rely on. Each declaration
//! pairs a descriptor (required? checked? timeout? retries?) with a
//! [`HealthProbe`] implementation supplied at initialization. All enabled
//! checks run concurrently; a failing optional dependency degrades only its
//! own entry, a failing required one fails the aggregate. The checker runs
//! as the pre-flight gate in `start()` and inside the public
//! `health_check()`.

use crate::error::{AdapterError, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn default_true() -> bool {
    true
}

fn default_dep_timeout_ms() -> u64 {
    5000
}

/// Declaration of one external dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    /// Dependency name (unique per adapter)
    pub name: String,

    /// A failing required dependency fails the aggregate check
    #[serde(default = "default_true")]
    pub required: bool,

    /// Disabled checks are skipped and reported healthy
    #[serde(default = "default_true")]
    pub health_check_enabled: bool,

    /// Per-attempt probe timeout in milliseconds
    #[serde(default = "default_dep_timeout_ms")]
    pub timeout_ms: u64,

    /// Additional probe attempts after the first failure
    #[serde(default)]
    pub retries: u32,
}

impl DependencyDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            health_check_enabled: true,
            timeout_ms: default_dep_timeout_ms(),
            retries: 0,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn unchecked(mut self) -> Self {
        self.health_check_enabled = false;
        self
    }
}

/// Probe seam implemented per dependency by the embedding adapter.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<()>;
}

/// Outcome of one dependency's check
#[derive(Debug, Clone)]
pub struct DependencyCheckResult {
    pub name: String,
    pub required: bool,
    pub healthy: bool,
    /// True when the check was disabled and not actually probed
    pub skipped: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Aggregate of all dependency checks
#[derive(Debug, Clone)]
pub struct DependencyReport {
    pub healthy: bool,
    pub results: Vec<DependencyCheckResult>,
}

impl DependencyReport {
    /// First failing required dependency, if any
    pub fn first_required_failure(&self) -> Option<&DependencyCheckResult> {
        self.results
            .iter()
            .find(|result| result.required && !result.healthy)
    }
}

/// Runs declared dependency checks concurrently.
pub struct DependencyChecker {
    deps: Vec<(DependencyDescriptor, Arc<dyn HealthProbe>)>,
}

impl DependencyChecker {
    pub fn new() -> Self {
        Self { deps: Vec::new() }
    }

    /// Wire a declared dependency to its probe
    pub fn register(&mut self, descriptor: DependencyDescriptor, probe: Arc<dyn HealthProbe>) {
        self.deps.push((descriptor, probe));
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Run every enabled check concurrently and aggregate the results.
    pub async fn check_all(&self) -> DependencyReport {
        let checks = self
            .deps
            .iter()
            .map(|(descriptor, probe)| Self::check_one(descriptor, Arc::clone(probe)));
        let results = join_all(checks).await;

        let healthy = results
            .iter()
            .all(|result| result.healthy || !result.required);

        if !healthy {
            tracing::warn!(
                failed = results.iter().filter(|r| !r.healthy).count(),
                "required dependency check failed"
            );
        }

        DependencyReport { healthy, results }
    }

    async fn check_one(
        descriptor: &DependencyDescriptor,
        probe: Arc<dyn HealthProbe>,
    ) -> DependencyCheckResult {
        if !descriptor.health_check_enabled {
            return DependencyCheckResult {
                name: descriptor.name.clone(),
                required: descriptor.required,
                healthy: true,
                skipped: true,
                error: None,
                duration_ms: 0,
            };
        }

        let timeout = Duration::from_millis(descriptor.timeout_ms);
        let started = Instant::now();
        let mut last_error: Option<String> = None;

        for _attempt in 0..=descriptor.retries {
            match tokio::time::timeout(timeout, probe.check()).await {
                Ok(Ok(())) => {
                    return DependencyCheckResult {
                        name: descriptor.name.clone(),
                        required: descriptor.required,
                        healthy: true,
                        skipped: false,
                        error: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
                Ok(Err(err)) => {
                    last_error = Some(err.to_string());
                }
                Err(_) => {
                    last_error = Some(format!(
                        "health check timed out after {}ms",
                        descriptor.timeout_ms
                    ));
                }
            }
        }

        DependencyCheckResult {
            name: descriptor.name.clone(),
            required: descriptor.required,
            healthy: false,
            skipped: false,
            error: last_error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

impl Default for DependencyChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a failed report into the error surfaced by `start()`.
pub fn report_to_error(report: &DependencyReport) -> Option<AdapterError> {
    report
        .first_required_failure()
        .map(|failure| AdapterError::Dependency {
            name: failure.name.clone(),
            message: failure
                .error
                .clone()
                .unwrap_or_else(|| "health check failed".to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysHealthy;

    #[async_trait::async_trait]
    impl HealthProbe for AlwaysHealthy {
        async fn check(&self) -> Result<()> {
            Ok(())
        }
    }

    struct AlwaysDown;

    #[async_trait::async_trait]
    impl HealthProbe for AlwaysDown {
        async fn check(&self) -> Result<()> {
            Err(AdapterError::backend("connection refused"))
        }
    }

    struct SlowProbe;

    #[async_trait::async_trait]
    impl HealthProbe for SlowProbe {
        async fn check(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    /// Fails a fixed number of times, then recovers
    struct FlakyProbe {
        failures_left: AtomicU32,
    }

    #[async_trait::async_trait]
    impl HealthProbe for FlakyProbe {
        async fn check(&self) -> Result<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(AdapterError::backend("flaky"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let mut checker = DependencyChecker::new();
        checker.register(DependencyDescriptor::new("store"), Arc::new(AlwaysHealthy));
        checker.register(DependencyDescriptor::new("board"), Arc::new(AlwaysHealthy));

        let report = checker.check_all().await;
        assert!(report.healthy);
        assert_eq!(report.results.len(), 2);
        assert!(report.first_required_failure().is_none());
    }

    #[tokio::test]
    async fn test_required_failure_fails_aggregate() {
        let mut checker = DependencyChecker::new();
        checker.register(DependencyDescriptor::new("store"), Arc::new(AlwaysDown));

        let report = checker.check_all().await;
        assert!(!report.healthy);
        let failure = report.first_required_failure().unwrap();
        assert_eq!(failure.name, "store");
        assert!(failure.error.as_deref().unwrap().contains("connection refused"));

        let err = report_to_error(&report).unwrap();
        assert_eq!(err.code(), "DependencyError");
    }

    #[tokio::test]
    async fn test_optional_failure_does_not_fail_aggregate() {
        let mut checker = DependencyChecker::new();
        checker.register(DependencyDescriptor::new("store"), Arc::new(AlwaysHealthy));
        checker.register(
            DependencyDescriptor::new("telemetry").optional(),
            Arc::new(AlwaysDown),
        );

        let report = checker.check_all().await;
        assert!(report.healthy);
        assert!(report.results.iter().any(|r| !r.healthy));
        assert!(report_to_error(&report).is_none());
    }

    #[tokio::test]
    async fn test_disabled_check_skipped() {
        let mut checker = DependencyChecker::new();
        checker.register(
            DependencyDescriptor::new("store").unchecked(),
            Arc::new(AlwaysDown),
        );

        let report = checker.check_all().await;
        assert!(report.healthy);
        assert!(report.results[0].skipped);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let mut checker = DependencyChecker::new();
        checker.register(
            DependencyDescriptor::new("store").with_timeout_ms(20),
            Arc::new(SlowProbe),
        );

        let report = checker.check_all().await;
        assert!(!report.healthy);
        assert!(report.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_retries_recover_flaky_dependency() {
        let mut checker = DependencyChecker::new();
        checker.register(
            DependencyDescriptor::new("store").with_retries(2),
            Arc::new(FlakyProbe {
                failures_left: AtomicU32::new(2),
            }),
        );

        let report = checker.check_all().await;
        assert!(report.healthy);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let mut checker = DependencyChecker::new();
        checker.register(
            DependencyDescriptor::new("store").with_retries(1),
            Arc::new(FlakyProbe {
                failures_left: AtomicU32::new(5),
            }),
        );

        let report = checker.check_all().await;
        assert!(!report.healthy);
    }

    #[test]
    fn test_descriptor_defaults_from_json() {
        let descriptor: DependencyDescriptor =
            serde_json::from_str(r#"{"name": "store"}"#).unwrap();
        assert!(descriptor.required);
        assert!(descriptor.health_check_enabled);
        assert_eq!(descriptor.timeout_ms, 5000);
        assert_eq!(descriptor.retries, 0);
    }
}
