//! In-flight request deduplication
//!
//! Concurrent identical calls are coalesced onto a single backend
//! invocation. The first caller for a key becomes the *leader* and runs the
//! pipeline; everyone who arrives while the leader is in flight becomes a
//! *follower* and simply awaits the leader's settlement. The check-or-insert
//! is a single lock scope with no await point inside it, which is what makes
//! the at-most-one guarantee hold.
//!
//! Dedup keys are shared with the cache: `prefix + operation + ":" +
//! base64(JSON(params))`. Deduplication applies to every operation;
//! cacheability is a separate, narrower concern.

use base64::Engine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::broadcast;

use crate::error::ErrorBody;

/// Settled outcome of one logical call, shared between coalesced callers.
///
/// Metadata (duration, operation id) is per-caller and attached by the
/// dispatcher; only the payload is shared.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<ErrorBody>,
}

impl ExecutionOutcome {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Derive the shared cache/dedup key for an operation call.
pub fn derive_key(prefix: &str, operation: &str, params: &serde_json::Value) -> String {
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(params.to_string().as_bytes());
    format!("{}{}:{}", prefix, operation, encoded)
}

/// One in-flight backend call awaiting settlement
struct PendingCall {
    tx: broadcast::Sender<ExecutionOutcome>,
    started_at: Instant,
    waiter_count: u64,
}

/// Completion handle held by the leader of an in-flight call.
///
/// The handle owns its own sender clone, so a `clear()` racing with the
/// call does not strand followers that already attached — they still
/// receive the eventual settlement.
pub struct PendingHandle {
    key: String,
    tx: broadcast::Sender<ExecutionOutcome>,
}

/// Result of the atomic check-or-insert
pub enum DedupSlot {
    /// This caller runs the backend call and must settle via
    /// [`DedupRegistry::settle`]
    Leader(PendingHandle),

    /// Another call for the same key is in flight; await its outcome
    Follower(broadcast::Receiver<ExecutionOutcome>),
}

/// Snapshot of registry counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupStats {
    /// Entries currently in flight
    pub in_flight: usize,
    /// All-time count of leader registrations
    pub leaders: u64,
    /// All-time count of coalesced (follower) attachments
    pub coalesced: u64,
}

/// Registry coalescing concurrent identical in-flight calls.
pub struct DedupRegistry {
    pending: Mutex<HashMap<String, PendingCall>>,
    leaders: AtomicU64,
    coalesced: AtomicU64,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            leaders: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Atomic check-or-insert for `key`.
    ///
    /// Exactly one caller per key receives `Leader` at any instant; all
    /// others receive `Follower` until the leader settles.
    pub fn begin(&self, key: &str) -> DedupSlot {
        let mut pending = self.pending.lock().unwrap();

        if let Some(call) = pending.get_mut(key) {
            call.waiter_count += 1;
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, waiters = call.waiter_count, "coalesced onto in-flight call");
            return DedupSlot::Follower(call.tx.subscribe());
        }

        let (tx, _rx) = broadcast::channel(1);
        pending.insert(
            key.to_string(),
            PendingCall {
                tx: tx.clone(),
                started_at: Instant::now(),
                waiter_count: 1,
            },
        );
        self.leaders.fetch_add(1, Ordering::Relaxed);
        DedupSlot::Leader(PendingHandle {
            key: key.to_string(),
            tx,
        })
    }

    /// Settle a leader's call: remove the entry so the next call starts
    /// fresh, then broadcast the outcome to every attached follower.
    pub fn settle(&self, handle: PendingHandle, outcome: &ExecutionOutcome) {
        {
            let mut pending = self.pending.lock().unwrap();
            pending.remove(&handle.key);
        }
        // Send failures just mean nobody coalesced onto this call.
        let _ = handle.tx.send(outcome.clone());
    }

    /// Age of the in-flight call for `key`, if any
    pub fn in_flight_age(&self, key: &str) -> Option<std::time::Duration> {
        let pending = self.pending.lock().unwrap();
        pending.get(key).map(|call| call.started_at.elapsed())
    }

    /// Drop all registry entries without aborting leaders. In-flight
    /// leaders still settle through their own handles.
    pub fn clear(&self) {
        let mut pending = self.pending.lock().unwrap();
        pending.clear();
    }

    /// Number of calls currently in flight
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Check if no calls are in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of registry counters
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            in_flight: self.len(),
            leaders: self.leaders.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

impl Default for DedupRegistry {
    fn default() -> Self {
        Self::new()
    }
}
