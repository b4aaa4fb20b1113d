//! Lifecycle state machine for adapter instances
//!
//! Valid transitions:
//!
//! ```text
//! Uninitialized → Initializing → Initialized → Starting → Running
//!                                                            │
//!                                              Stopping ◄────┘
//!                                                 │
//!                                              Stopped
//! ```
//!
//! `Error` is reachable from any active state; `Destroyed` is terminal and
//! absorbing. Restart after `Stopped` is not guaranteed to be safe — treat
//! an adapter as single-use per process.

use crate::error::{AdapterError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Operating states of an adapter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// Freshly constructed, no configuration applied
    Uninitialized,

    /// Configuration being validated and wired
    Initializing,

    /// Configured and ready to start
    Initialized,

    /// Pre-flight dependency checks in progress
    Starting,

    /// Accepting operations
    Running,

    /// Draining registries before stop
    Stopping,

    /// Stopped; internal structures intact but no operations accepted
    Stopped,

    /// A lifecycle step failed; the instance is unusable
    Error,

    /// Terminal. All collections cleared, no further calls accepted.
    Destroyed,
}

impl AdapterState {
    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterState::Uninitialized => "uninitialized",
            AdapterState::Initializing => "initializing",
            AdapterState::Initialized => "initialized",
            AdapterState::Starting => "starting",
            AdapterState::Running => "running",
            AdapterState::Stopping => "stopping",
            AdapterState::Stopped => "stopped",
            AdapterState::Error => "error",
            AdapterState::Destroyed => "destroyed",
        }
    }

    /// States from which `Error` is reachable
    pub fn is_active(&self) -> bool {
        !matches!(self, AdapterState::Destroyed)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a completed state transition
#[derive(Debug, Clone)]
pub struct LifecycleTransition {
    pub from: AdapterState,
    pub to: AdapterState,
    pub at: DateTime<Utc>,
}

/// State machine guarding adapter lifecycle transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: AdapterState,
    state_entered_at: Instant,
    history: Vec<LifecycleTransition>,
}

impl Lifecycle {
    /// Create a new lifecycle in the Uninitialized state
    pub fn new() -> Self {
        Self {
            state: AdapterState::Uninitialized,
            state_entered_at: Instant::now(),
            history: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Time spent in the current state
    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    /// Completed transitions, oldest first
    pub fn history(&self) -> &[LifecycleTransition] {
        &self.history
    }

    /// Whether a transition from the current state to `to` is legal
    pub fn can_transition(&self, to: AdapterState) -> bool {
        use AdapterState::*;
        match (self.state, to) {
            // Destroyed absorbs everything
            (Destroyed, _) => false,
            // Error and Destroyed are reachable from any active state
            (from, Error) => from.is_active(),
            (from, Destroyed) => from.is_active(),
            // The forward path
            (Uninitialized, Initializing) => true,
            (Initializing, Initialized) => true,
            (Initialized, Starting) => true,
            (Starting, Running) => true,
            (Running, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }

    /// Perform a transition, rejecting illegal ones with `NotReady`.
    pub fn transition_to(&mut self, to: AdapterState) -> Result<LifecycleTransition> {
        if !self.can_transition(to) {
            return Err(AdapterError::NotReady {
                state: self.state.as_str().to_string(),
            });
        }

        let transition = LifecycleTransition {
            from: self.state,
            to,
            at: Utc::now(),
        };
        tracing::debug!(from = %transition.from, to = %transition.to, "lifecycle transition");

        self.state = to;
        self.state_entered_at = Instant::now();
        self.history.push(transition.clone());
        Ok(transition)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
