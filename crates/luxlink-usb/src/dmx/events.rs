//! Driver lifecycle events
//!
//! Drivers notify subscribers of connection state changes and breaker trips
//! through a small typed event bus: an enumerated event kind, a typed
//! payload per variant, and per-kind subscriber lists invoked synchronously
//! in registration order.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

/// Cause carried by a [`DriverEvent::Error`] event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorReason {
    /// A connect-sequence step failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// The consecutive-failure threshold was crossed; output was stopped.
    #[error("too many transfer errors ({0} consecutive)")]
    TooManyTransferErrors(u32),
}

/// A driver lifecycle event
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// The driver completed its connect sequence.
    Connected { driver: String },
    /// The driver released its transport.
    Disconnected { driver: String },
    /// The driver hit an unrecoverable condition (a failed connect attempt,
    /// or the transfer-error threshold).
    Error { driver: String, reason: ErrorReason },
}

impl DriverEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DriverEvent::Connected { .. } => EventKind::Connected,
            DriverEvent::Disconnected { .. } => EventKind::Disconnected,
            DriverEvent::Error { .. } => EventKind::Error,
        }
    }
}

/// Event kinds a subscriber can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type Handler = Box<dyn Fn(&DriverEvent) + Send + Sync>;

#[derive(Default)]
struct BusState {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(HandlerId, Handler)>>,
}

/// Per-driver subscriber registry.
///
/// Handlers run synchronously on the emitting task, in registration order.
/// They must not subscribe or unsubscribe from within a handler.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&DriverEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        let mut state = self.state.lock();
        let id = HandlerId(state.next_id);
        state.next_id += 1;
        state
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut state = self.state.lock();
        let Some(handlers) = state.handlers.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Invoke every handler registered for the event's kind, in
    /// registration order. Handler panics propagate to the caller; the
    /// registry itself stays consistent (guards release on unwind).
    pub(crate) fn emit(&self, event: &DriverEvent) {
        let state = self.state.lock();
        if let Some(handlers) = state.handlers.get(&event.kind()) {
            for (_, handler) in handlers {
                handler(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn connected() -> DriverEvent {
        DriverEvent::Connected {
            driver: "test".into(),
        }
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in [1, 2, 3] {
            let order = order.clone();
            bus.on(EventKind::Connected, move |_| order.lock().push(tag));
        }

        bus.emit(&connected());
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_off_unregisters_a_single_handler() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0u32));

        let count_a = count.clone();
        let a = bus.on(EventKind::Connected, move |_| *count_a.lock() += 1);
        let count_b = count.clone();
        let _b = bus.on(EventKind::Connected, move |_| *count_b.lock() += 1);

        assert!(bus.off(EventKind::Connected, a));
        assert!(!bus.off(EventKind::Connected, a));

        bus.emit(&connected());
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_kinds_are_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0u32));

        let count_err = count.clone();
        bus.on(EventKind::Error, move |_| *count_err.lock() += 1);

        bus.emit(&connected());
        assert_eq!(*count.lock(), 0);
    }
}
