//! Event bus - central pub/sub for engine events
//!
//! Built on a tokio broadcast channel: components emit, consumers (UI
//! forwarders, loggers, tests) subscribe. Each subscriber owns an
//! independent receiver, so a slow or panicking consumer cannot affect
//! delivery to the others. A bounded history ring keeps recent events
//! for debugging.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{Event, EventKind};

/// Default broadcast channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Default history ring size
pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// Central event bus
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
    history_capacity: usize,
}

impl EventBus {
    /// Create a bus with the given channel and history capacities
    pub fn new(channel_capacity: usize, history_capacity: usize) -> Self {
        debug!(channel_capacity, history_capacity, "EventBus::new");
        let (tx, _) = broadcast::channel(channel_capacity);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
        }
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: no subscribers is fine, and a full channel drops
    /// the oldest events for the lagging subscriber only.
    pub fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), source = %event.source, "EventBus::emit");

        {
            let mut history = self.history.lock().expect("event history mutex poisoned");
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    /// Build and emit an event in one call
    pub fn emit_kind(&self, kind: EventKind, source: &str) {
        self.emit(Event::new(kind, source));
    }

    /// Subscribe to receive all events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// The newest `n` events, oldest first
    pub fn recent(&self, n: usize) -> Vec<Event> {
        let history = self.history.lock().expect("event history mutex poisoned");
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    /// Create an emitting handle bound to a source name
    pub fn scope(self: &Arc<Self>, source: impl Into<String>) -> EventScope {
        EventScope {
            bus: Arc::clone(self),
            source: source.into(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY, DEFAULT_HISTORY_CAPACITY)
    }
}

/// Cheap-to-clone emitter handle with a pre-set source
#[derive(Clone)]
pub struct EventScope {
    bus: Arc<EventBus>,
    source: String,
}

impl EventScope {
    /// The source name this scope emits as
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Emit an event kind under this scope's source
    pub fn emit(&self, kind: EventKind) {
        self.bus.emit(Event::new(kind, &self.source));
    }

    /// Emit with a correlation id
    pub fn emit_correlated(&self, kind: EventKind, correlation_id: &str) {
        self.bus.emit(Event::new(kind, &self.source).correlated(correlation_id));
    }
}

/// Create a shared event bus with default capacities
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::default())
}
