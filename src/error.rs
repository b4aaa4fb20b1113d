//! Error types for the relay execution core
//!
//! Lifecycle and configuration errors are returned as `Err` so a half-built
//! adapter is never reachable. Everything raised inside `execute` is caught
//! by the dispatcher and normalized into the structured result — callers of
//! `execute` never see an `Err`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors produced by the adapter core.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Invalid configuration at initialize/update time. Fails fast.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation attempted while the adapter is not in the Running state.
    #[error("adapter not ready (state: {state})")]
    NotReady { state: String },

    /// Operation exceeded its configured timeout.
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// A required dependency's health check failed.
    #[error("dependency '{name}' unhealthy: {message}")]
    Dependency { name: String, message: String },

    /// The circuit breaker for the target resource is open.
    #[error("circuit open for resource '{resource}'")]
    CircuitOpen { resource: String },

    /// The dispatcher has no handler registered for this operation name.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// Pass-through failure raised by the backend handler.
    #[error("backend error: {message}")]
    Backend {
        message: String,
        details: Option<serde_json::Value>,
    },
}

impl AdapterError {
    /// Stable wire code for the structured result.
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Configuration(_) => "ConfigurationError",
            AdapterError::NotReady { .. } => "NotReadyError",
            AdapterError::Timeout { .. } => "TimeoutError",
            AdapterError::Dependency { .. } => "DependencyError",
            AdapterError::CircuitOpen { .. } => "CircuitOpenError",
            AdapterError::UnknownOperation(_) => "UnknownOperationError",
            AdapterError::Backend { .. } => "BackendError",
        }
    }

    /// Check if this error is transient (worth retrying).
    ///
    /// Policy-level blocks (circuit open, dependency failure, unknown
    /// operation, lifecycle gating, bad config) are never retried — the
    /// retry budget exists only for transient backend failures.
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Backend { .. } => true,
            AdapterError::Timeout { .. } => true,
            AdapterError::Configuration(_) => false,
            AdapterError::NotReady { .. } => false,
            AdapterError::Dependency { .. } => false,
            AdapterError::CircuitOpen { .. } => false,
            AdapterError::UnknownOperation(_) => false,
        }
    }

    /// Convenience constructor for backend failures without details.
    pub fn backend(message: impl Into<String>) -> Self {
        AdapterError::Backend {
            message: message.into(),
            details: None,
        }
    }
}

/// Wire shape of an error inside an `ExecutionResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error code (e.g. "TimeoutError")
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Optional structured details from the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&AdapterError> for ErrorBody {
    fn from(err: &AdapterError) -> Self {
        let details = match err {
            AdapterError::Backend { details, .. } => details.clone(),
            _ => None,
        };
        ErrorBody {
            code: err.code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}
