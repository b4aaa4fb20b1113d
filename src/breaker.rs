//! Per-resource circuit breaker registry
//!
//! One breaker per external resource identifier (a protocol or connection
//! target, not an operation name). Breakers prevent hammering a target that
//! is consistently failing:
//!
//! - `Closed`: calls pass; each failed call grows the streak, and the
//!   breaker opens at the failure threshold.
//! - `Open`: calls are rejected immediately; once the cooldown has elapsed
//!   since the last failure the next caller is admitted as a half-open
//!   trial.
//! - `HalfOpen`: exactly one trial call at a time. Trial success closes the
//!   breaker and resets the streak; trial failure reopens it and restarts
//!   the cooldown.
//!
//! Retries happen within a single logical call; breaker state accumulates
//! across calls, one streak increment per settled failure.

use crate::config::BreakerConfig;
use crate::error::{AdapterError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Observable state of one breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
enum EntryState {
    Closed,
    Open { last_failure_at: Instant },
    HalfOpen { trial_active: bool },
}

#[derive(Debug)]
struct BreakerEntry {
    consecutive_failures: u32,
    state: EntryState,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            state: EntryState::Closed,
        }
    }
}

/// Snapshot of one resource's breaker, for status reporting
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub resource: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

/// Registry of per-resource breakers sharing one configuration.
pub struct CircuitBreakerRegistry {
    entries: Mutex<HashMap<String, BreakerEntry>>,
    config: Mutex<BreakerConfig>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config: Mutex::new(config),
        }
    }

    /// Replace thresholds (applied to subsequent decisions)
    pub fn reconfigure(&self, config: BreakerConfig) {
        *self.config.lock().unwrap() = config;
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.config.lock().unwrap().cooldown_ms)
    }

    fn failure_threshold(&self) -> u32 {
        self.config.lock().unwrap().failure_threshold
    }

    /// Admission check for a call against `resource`.
    ///
    /// Resources with no recorded failure pass without creating state.
    /// An open breaker whose cooldown has elapsed admits the caller as the
    /// half-open trial; while a trial is in flight, everyone else is
    /// rejected.
    pub fn check(&self, resource: &str) -> Result<()> {
        let cooldown = self.cooldown();
        let mut entries = self.entries.lock().unwrap();

        let entry = match entries.get_mut(resource) {
            None => return Ok(()),
            Some(entry) => entry,
        };

        match &mut entry.state {
            EntryState::Closed => Ok(()),
            EntryState::Open { last_failure_at } => {
                if last_failure_at.elapsed() >= cooldown {
                    entry.state = EntryState::HalfOpen { trial_active: true };
                    tracing::debug!(resource, "breaker half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(AdapterError::CircuitOpen {
                        resource: resource.to_string(),
                    })
                }
            }
            EntryState::HalfOpen { trial_active } => {
                if *trial_active {
                    Err(AdapterError::CircuitOpen {
                        resource: resource.to_string(),
                    })
                } else {
                    *trial_active = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a settled successful call against `resource`.
    pub fn record_success(&self, resource: &str) {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(resource) else {
            return;
        };

        match entry.state {
            EntryState::Closed => {
                entry.consecutive_failures = 0;
            }
            EntryState::HalfOpen { .. } => {
                tracing::info!(resource, "breaker trial succeeded, closing");
                entry.state = EntryState::Closed;
                entry.consecutive_failures = 0;
            }
            EntryState::Open { .. } => {
                // A success can only come from a call admitted before the
                // breaker tripped; treat it as recovery.
                entry.state = EntryState::Closed;
                entry.consecutive_failures = 0;
            }
        }
    }

    /// Record a settled failed call against `resource`. Creates the breaker
    /// entry on the first failure.
    pub fn record_failure(&self, resource: &str) {
        let threshold = self.failure_threshold();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(resource.to_string())
            .or_insert_with(BreakerEntry::new);

        entry.consecutive_failures += 1;

        match entry.state {
            EntryState::Closed => {
                if entry.consecutive_failures >= threshold {
                    tracing::warn!(
                        resource,
                        failures = entry.consecutive_failures,
                        "breaker opened"
                    );
                    entry.state = EntryState::Open {
                        last_failure_at: Instant::now(),
                    };
                }
            }
            EntryState::HalfOpen { .. } => {
                tracing::warn!(resource, "breaker trial failed, reopening");
                entry.state = EntryState::Open {
                    last_failure_at: Instant::now(),
                };
            }
            EntryState::Open { ref mut last_failure_at } => {
                // Failures from calls admitted before the trip keep the
                // cooldown fresh.
                *last_failure_at = Instant::now();
            }
        }
    }

    /// Observable state for `resource` (`Closed` when untracked)
    pub fn state_of(&self, resource: &str) -> BreakerState {
        let entries = self.entries.lock().unwrap();
        match entries.get(resource).map(|entry| &entry.state) {
            None | Some(EntryState::Closed) => BreakerState::Closed,
            Some(EntryState::Open { .. }) => BreakerState::Open,
            Some(EntryState::HalfOpen { .. }) => BreakerState::HalfOpen,
        }
    }

    /// Current failure streak for `resource`
    pub fn failure_count(&self, resource: &str) -> u32 {
        let entries = self.entries.lock().unwrap();
        entries
            .get(resource)
            .map(|entry| entry.consecutive_failures)
            .unwrap_or(0)
    }

    /// Snapshot of every tracked breaker
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .map(|(resource, entry)| BreakerSnapshot {
                resource: resource.clone(),
                state: match entry.state {
                    EntryState::Closed => BreakerState::Closed,
                    EntryState::Open { .. } => BreakerState::Open,
                    EntryState::HalfOpen { .. } => BreakerState::HalfOpen,
                },
                consecutive_failures: entry.consecutive_failures,
            })
            .collect()
    }

    /// Drop all breaker state
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
