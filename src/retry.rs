//! Retry policy engine
//!
//! Pure decision logic: the dispatcher owns the attempt loop and metric
//! recording; this module only answers "retry this?" and "after how long?".
//!
//! A retry is granted only when retries are enabled, the operation is on
//! the retryable allow-list, the attempt budget is not exhausted, and the
//! error is transient. Policy-level blocks (circuit open, dependency
//! failure, unknown operation) never consume retry budget.

use crate::config::RetryConfig;
use crate::error::AdapterError;
use std::collections::HashSet;
use std::time::Duration;

/// Decides retry eligibility and backoff delays for one adapter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    max_attempts: u32,
    backoff_multiplier: f64,
    base_delay: Duration,
    retryable: HashSet<String>,
    short_timeout_floor_ms: u64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts,
            backoff_multiplier: config.backoff_multiplier,
            base_delay: Duration::from_millis(config.base_delay_ms),
            retryable: config.retryable_operations.iter().cloned().collect(),
            short_timeout_floor_ms: config.short_timeout_floor_ms,
        }
    }

    /// Total attempt budget per logical call (first attempt included)
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `operation` is on the retryable allow-list
    pub fn is_retryable_operation(&self, operation: &str) -> bool {
        self.retryable.contains(operation)
    }

    /// Decide whether the failed `attempt` (1-based) should be retried.
    ///
    /// Timeouts configured below the short-timeout floor are never retried:
    /// a caller that asked for a 50ms deadline wants fail-fast semantics,
    /// and retrying such calls multiplies load exactly when the backend is
    /// slow.
    pub fn should_retry(&self, operation: &str, attempt: u32, error: &AdapterError) -> bool {
        if !self.enabled || !self.retryable.contains(operation) {
            return false;
        }
        if attempt >= self.max_attempts {
            return false;
        }
        if !error.is_transient() {
            return false;
        }
        if let AdapterError::Timeout { timeout_ms, .. } = error {
            if *timeout_ms < self.short_timeout_floor_ms {
                tracing::debug!(
                    operation,
                    timeout_ms,
                    floor_ms = self.short_timeout_floor_ms,
                    "short-timeout failure not retried"
                );
                return false;
            }
        }
        true
    }

    /// Backoff delay after the failed `attempt` (1-based):
    /// `backoff_multiplier^(attempt-1) * base_delay`.
    ///
    /// Deliberately jitter-free so delays stay exactly predictable;
    /// correlated retry storms are accepted as a known gap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_ms = (self.base_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(overrides: impl FnOnce(&mut RetryConfig)) -> RetryPolicy {
        let mut config = RetryConfig {
            retryable_operations: vec!["fetch".to_string()],
            base_delay_ms: 100,
            ..Default::default()
        };
        overrides(&mut config);
        RetryPolicy::new(&config)
    }

    fn backend_err() -> AdapterError {
        AdapterError::backend("transient failure")
    }

    #[test]
    fn test_allow_listed_transient_failure_retries() {
        let policy = policy(|_| {});
        assert!(policy.should_retry("fetch", 1, &backend_err()));
        assert!(policy.should_retry("fetch", 2, &backend_err()));
    }

    #[test]
    fn test_budget_exhaustion() {
        let policy = policy(|c| c.max_attempts = 3);
        assert!(!policy.should_retry("fetch", 3, &backend_err()));
        assert!(!policy.should_retry("fetch", 4, &backend_err()));
    }

    #[test]
    fn test_non_allow_listed_operation_never_retries() {
        let policy = policy(|_| {});
        assert!(!policy.should_retry("store", 1, &backend_err()));
    }

    #[test]
    fn test_disabled_never_retries() {
        let policy = policy(|c| c.enabled = false);
        assert!(!policy.should_retry("fetch", 1, &backend_err()));
    }

    #[test]
    fn test_policy_errors_never_retry() {
        let policy = policy(|_| {});
        assert!(!policy.should_retry(
            "fetch",
            1,
            &AdapterError::CircuitOpen {
                resource: "docs".to_string()
            }
        ));
        assert!(!policy.should_retry(
            "fetch",
            1,
            &AdapterError::Dependency {
                name: "store".to_string(),
                message: "down".to_string()
            }
        ));
        assert!(!policy.should_retry("fetch", 1, &AdapterError::UnknownOperation("x".to_string())));
    }

    #[test]
    fn test_short_timeout_not_retried() {
        let policy = policy(|c| c.short_timeout_floor_ms = 5000);
        let tight = AdapterError::Timeout {
            operation: "fetch".to_string(),
            timeout_ms: 50,
        };
        assert!(!policy.should_retry("fetch", 1, &tight));

        let generous = AdapterError::Timeout {
            operation: "fetch".to_string(),
            timeout_ms: 30_000,
        };
        assert!(policy.should_retry("fetch", 1, &generous));
    }

    #[test]
    fn test_exponential_delays() {
        let policy = policy(|c| {
            c.base_delay_ms = 100;
            c.backoff_multiplier = 2.0;
        });
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_unit_multiplier_keeps_delay_flat() {
        let policy = policy(|c| {
            c.base_delay_ms = 250;
            c.backoff_multiplier = 1.0;
        });
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(5), Duration::from_millis(250));
    }

    #[test]
    fn test_retryable_operation_lookup() {
        let policy = policy(|_| {});
        assert!(policy.is_retryable_operation("fetch"));
        assert!(!policy.is_retryable_operation("store"));
    }
}
