//! Lifecycle and operation event publishing
//!
//! An explicit per-event-kind observer registry: `on` registers a handler
//! and returns a token, `off` removes one handler or every handler of a
//! kind, `emit` notifies synchronously. Handlers run outside the registry
//! lock, so a handler may register or remove observers without deadlocking.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Kinds of events an adapter publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Initializing,
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
    Error,
    Operation,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Initializing => "initializing",
            EventKind::Initialized => "initialized",
            EventKind::Starting => "starting",
            EventKind::Started => "started",
            EventKind::Stopping => "stopping",
            EventKind::Stopped => "stopped",
            EventKind::Error => "error",
            EventKind::Operation => "operation",
        }
    }
}

/// An event delivered to observers
#[derive(Debug, Clone)]
pub struct AdapterEvent {
    pub kind: EventKind,
    /// Name of the emitting adapter
    pub adapter: String,
    pub timestamp: DateTime<Utc>,
    /// Optional structured payload (e.g. operation name and success flag)
    pub data: Option<serde_json::Value>,
    /// Present on failure events
    pub error: Option<String>,
}

impl AdapterEvent {
    pub fn new(kind: EventKind, adapter: impl Into<String>) -> Self {
        Self {
            kind,
            adapter: adapter.into(),
            timestamp: Utc::now(),
            data: None,
            error: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Token identifying a registered handler, for targeted removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type EventHandler = Arc<dyn Fn(&AdapterEvent) + Send + Sync>;

/// Per-event-kind observer registry.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(HandlerId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&AdapterEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap();
        handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler (by token) or every handler of `kind`.
    pub fn off(&self, kind: EventKind, id: Option<HandlerId>) {
        let mut handlers = self.handlers.write().unwrap();
        match id {
            Some(id) => {
                if let Some(list) = handlers.get_mut(&kind) {
                    list.retain(|(handler_id, _)| *handler_id != id);
                }
            }
            None => {
                handlers.remove(&kind);
            }
        }
    }

    /// Notify every handler registered for the event's kind.
    ///
    /// The handler list is snapshotted before invocation so callbacks never
    /// run under the registry lock.
    pub fn emit(&self, event: AdapterEvent) {
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.read().unwrap();
            match handlers.get(&event.kind) {
                Some(list) => list.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
                None => return,
            }
        };
        for handler in snapshot {
            handler(&event);
        }
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        let handlers = self.handlers.read().unwrap();
        handlers.get(&kind).map(|list| list.len()).unwrap_or(0)
    }

    /// Detach every observer
    pub fn clear(&self) {
        self.handlers.write().unwrap().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_handler(counter: Arc<AtomicUsize>) -> impl Fn(&AdapterEvent) + Send + Sync {
        move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_emit_reaches_registered_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on(EventKind::Started, counter_handler(Arc::clone(&count)));

        bus.emit(AdapterEvent::new(EventKind::Started, "docs"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_without_handlers_is_noop() {
        let bus = EventBus::new();
        bus.emit(AdapterEvent::new(EventKind::Error, "docs"));
    }

    #[test]
    fn test_handlers_scoped_to_kind() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on(EventKind::Started, counter_handler(Arc::clone(&count)));

        bus.emit(AdapterEvent::new(EventKind::Stopped, "docs"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_by_token_removes_single_handler() {
        let bus = EventBus::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let id_a = bus.on(EventKind::Operation, counter_handler(Arc::clone(&count_a)));
        bus.on(EventKind::Operation, counter_handler(Arc::clone(&count_b)));

        bus.off(EventKind::Operation, Some(id_a));
        bus.emit(AdapterEvent::new(EventKind::Operation, "docs"));

        assert_eq!(count_a.load(Ordering::SeqCst), 0);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_without_token_removes_all_of_kind() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on(EventKind::Operation, counter_handler(Arc::clone(&count)));
        bus.on(EventKind::Operation, counter_handler(Arc::clone(&count)));

        bus.off(EventKind::Operation, None);
        bus.emit(AdapterEvent::new(EventKind::Operation, "docs"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count(EventKind::Operation), 0);
    }

    #[test]
    fn test_multiple_handlers_all_notified() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            bus.on(EventKind::Operation, counter_handler(Arc::clone(&count)));
        }

        bus.emit(AdapterEvent::new(EventKind::Operation, "docs"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_payload_visible_to_handler() {
        let bus = EventBus::new();
        let seen = Arc::new(RwLock::new(None));
        let seen_clone = Arc::clone(&seen);
        bus.on(EventKind::Operation, move |event| {
            *seen_clone.write().unwrap() = event.data.clone();
        });

        bus.emit(
            AdapterEvent::new(EventKind::Operation, "docs")
                .with_data(serde_json::json!({"operation": "fetch", "success": true})),
        );

        let data = seen.read().unwrap().clone().unwrap();
        assert_eq!(data["operation"], "fetch");
    }

    #[test]
    fn test_handler_may_register_another_handler() {
        let bus = Arc::new(EventBus::new());
        let bus_clone = Arc::clone(&bus);
        bus.on(EventKind::Started, move |_event| {
            // Must not deadlock against the registry lock
            bus_clone.on(EventKind::Stopped, |_| {});
        });

        bus.emit(AdapterEvent::new(EventKind::Started, "docs"));
        assert_eq!(bus.handler_count(EventKind::Stopped), 1);
    }

    #[test]
    fn test_clear_detaches_everything() {
        let bus = EventBus::new();
        bus.on(EventKind::Started, |_| {});
        bus.on(EventKind::Error, |_| {});
        bus.clear();
        assert_eq!(bus.handler_count(EventKind::Started), 0);
        assert_eq!(bus.handler_count(EventKind::Error), 0);
    }
}
