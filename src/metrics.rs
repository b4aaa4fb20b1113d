//! Rolling operation metrics and health scoring
//!
//! Every call records exactly one terminal metric (plus one per retried
//! attempt). The hub keeps a rolling sample ring pruned to a retention
//! window, all-time counters for running averages, and a consecutive-failure
//! streak that feeds the categorical health score.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One recorded operation attempt or settlement
#[derive(Debug, Clone)]
pub struct OperationMetric {
    pub operation: String,
    pub duration_ms: u64,
    pub success: bool,
    pub cache_hit: bool,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl OperationMetric {
    pub fn new(operation: impl Into<String>, duration_ms: u64, success: bool) -> Self {
        Self {
            operation: operation.into(),
            duration_ms,
            success,
            cache_hit: false,
            retry_count: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_cache_hit(mut self) -> Self {
        self.cache_hit = true;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Categorical health derived from failures and error rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

/// Derived view over the hub's counters and sample ring
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Terminal calls, all-time
    pub total_operations: u64,
    /// Failed terminal calls, all-time
    pub total_failures: u64,
    /// Running average latency over all terminal calls
    pub avg_latency_ms: f64,
    /// 95th percentile latency within the recent window
    pub p95_latency_ms: u64,
    /// 99th percentile latency within the recent window
    pub p99_latency_ms: u64,
    /// Terminal calls per second within the recent window
    pub throughput_per_sec: f64,
    /// Failed fraction of rolling terminal samples
    pub error_rate: f64,
    /// Cache-hit fraction of terminal calls, all-time
    pub cache_hit_rate: f64,
    /// Coalesced-waiter fraction of terminal calls, all-time
    pub dedup_rate: f64,
    /// Current consecutive-failure streak
    pub consecutive_failures: u32,
    /// Samples currently retained (attempts included)
    pub retained_samples: usize,
    pub health: HealthStatus,
}

struct Sample {
    duration_ms: u64,
    success: bool,
    terminal: bool,
    at: Instant,
}

struct HubInner {
    samples: VecDeque<Sample>,
    retention: Duration,
    recent_window: Duration,
    total_calls: u64,
    total_failures: u64,
    total_duration_ms: u64,
    cache_hits: u64,
    consecutive_failures: u32,
}

/// Metrics and health aggregator for one adapter instance.
pub struct MetricsHub {
    inner: Mutex<HubInner>,
}

impl MetricsHub {
    pub fn new(retention: Duration, recent_window: Duration) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                samples: VecDeque::new(),
                retention,
                recent_window,
                total_calls: 0,
                total_failures: 0,
                total_duration_ms: 0,
                cache_hits: 0,
                consecutive_failures: 0,
            }),
        }
    }

    /// Replace the retention and percentile windows
    pub fn reconfigure(&self, retention: Duration, recent_window: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.retention = retention;
        inner.recent_window = recent_window;
    }

    /// Record the terminal metric for a settled call.
    pub fn record(&self, metric: &OperationMetric) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_calls += 1;
        inner.total_duration_ms += metric.duration_ms;
        if metric.cache_hit {
            inner.cache_hits += 1;
        }
        if metric.success {
            inner.consecutive_failures = 0;
        } else {
            inner.total_failures += 1;
            inner.consecutive_failures += 1;
        }
        inner.samples.push_back(Sample {
            duration_ms: metric.duration_ms,
            success: metric.success,
            terminal: true,
            at: Instant::now(),
        });
    }

    /// Record a failed attempt that will be retried. Attempt samples join
    /// the rolling ring but do not move the all-time call counters.
    pub fn record_attempt(&self, metric: &OperationMetric) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.push_back(Sample {
            duration_ms: metric.duration_ms,
            success: metric.success,
            terminal: false,
            at: Instant::now(),
        });
    }

    /// A successful health check resets the failure streak.
    pub fn health_check_succeeded(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
    }

    /// Drop samples older than the retention window. Returns the number
    /// pruned; they are unreachable afterwards.
    pub fn prune(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        Self::prune_locked(&mut inner)
    }

    fn prune_locked(inner: &mut HubInner) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(inner.retention) else {
            return 0;
        };
        let before = inner.samples.len();
        while matches!(inner.samples.front(), Some(sample) if sample.at < cutoff) {
            inner.samples.pop_front();
        }
        before - inner.samples.len()
    }

    /// Current consecutive-failure streak
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    /// Derive the categorical health score.
    ///
    /// `Unhealthy` past 5 consecutive failures, `Degraded` on an elevated
    /// error rate or a shorter streak, `Healthy` once any operation has
    /// completed, `Unknown` before that.
    pub fn health_status(&self) -> HealthStatus {
        let mut inner = self.inner.lock().unwrap();
        Self::prune_locked(&mut inner);
        Self::health_locked(&inner)
    }

    fn health_locked(inner: &HubInner) -> HealthStatus {
        if inner.consecutive_failures > 5 {
            return HealthStatus::Unhealthy;
        }
        if Self::error_rate_locked(inner) > 0.10 || inner.consecutive_failures > 2 {
            return HealthStatus::Degraded;
        }
        if inner.total_calls > 0 {
            return HealthStatus::Healthy;
        }
        HealthStatus::Unknown
    }

    fn error_rate_locked(inner: &HubInner) -> f64 {
        let mut terminal = 0u64;
        let mut failed = 0u64;
        for sample in &inner.samples {
            if sample.terminal {
                terminal += 1;
                if !sample.success {
                    failed += 1;
                }
            }
        }
        if terminal == 0 {
            0.0
        } else {
            failed as f64 / terminal as f64
        }
    }

    /// Snapshot the derived metrics. `coalesced_waiters` comes from the
    /// dedup registry and feeds the dedup rate.
    pub fn snapshot(&self, coalesced_waiters: u64) -> MetricsSnapshot {
        let mut inner = self.inner.lock().unwrap();
        Self::prune_locked(&mut inner);

        let recent_cutoff = Instant::now().checked_sub(inner.recent_window);
        let mut recent_durations: Vec<u64> = Vec::new();
        let mut recent_terminal = 0u64;
        for sample in &inner.samples {
            let in_window = match recent_cutoff {
                Some(cutoff) => sample.at >= cutoff,
                None => true,
            };
            if in_window {
                recent_durations.push(sample.duration_ms);
                if sample.terminal {
                    recent_terminal += 1;
                }
            }
        }
        recent_durations.sort_unstable();

        let avg_latency_ms = if inner.total_calls > 0 {
            inner.total_duration_ms as f64 / inner.total_calls as f64
        } else {
            0.0
        };
        let window_secs = inner.recent_window.as_secs_f64();
        let throughput_per_sec = if window_secs > 0.0 {
            recent_terminal as f64 / window_secs
        } else {
            0.0
        };
        let cache_hit_rate = if inner.total_calls > 0 {
            inner.cache_hits as f64 / inner.total_calls as f64
        } else {
            0.0
        };
        let dedup_rate = if inner.total_calls > 0 {
            coalesced_waiters as f64 / inner.total_calls as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            total_operations: inner.total_calls,
            total_failures: inner.total_failures,
            avg_latency_ms,
            p95_latency_ms: percentile(&recent_durations, 0.95),
            p99_latency_ms: percentile(&recent_durations, 0.99),
            throughput_per_sec,
            error_rate: Self::error_rate_locked(&inner),
            cache_hit_rate,
            dedup_rate,
            consecutive_failures: inner.consecutive_failures,
            retained_samples: inner.samples.len(),
            health: Self::health_locked(&inner),
        }
    }

    /// Drop every retained sample and reset counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.clear();
        inner.total_calls = 0;
        inner.total_failures = 0;
        inner.total_duration_ms = 0;
        inner.cache_hits = 0;
        inner.consecutive_failures = 0;
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (sorted.len() as f64 * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
