//! Event sinks and listener delivery guards.
//!
//! Attributes post freshly generated [`EventRecord`]s to an
//! [`EventSink`]. Sinks receive events that have **already** been
//! applied locally: a caller observes its own write the moment the
//! mutating method returns. The authoritative sink (server side) fans
//! events out to subscribers; [`PassiveSink`] just records them, which
//! is all an isolated object or a client proxy needs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use nexus_wire::EventRecord;

/// Receives freshly generated, already-applied mutation events.
pub trait EventSink: Send + Sync {
    fn post(&self, event: EventRecord);
}

/// A sink that records events without distributing them.
#[derive(Default)]
pub struct PassiveSink {
    events: Mutex<Vec<EventRecord>>,
}

impl PassiveSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every event recorded so far.
    pub fn drain(&self) -> Vec<EventRecord> {
        std::mem::take(&mut self.events.lock().expect("sink lock"))
    }

    /// Number of events recorded and not yet drained.
    pub fn len(&self) -> usize {
        self.events.lock().expect("sink lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for PassiveSink {
    fn post(&self, event: EventRecord) {
        self.events.lock().expect("sink lock").push(event);
    }
}

/// Runs one listener, containing any panic it raises. One bad listener
/// must never take down the loop that is delivering the event.
pub(crate) fn notify_guarded(what: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(listener = what, "listener panicked during delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_wire::{EventPayload, ObjectId, Value};

    fn event(n: i32) -> EventRecord {
        EventRecord {
            object: ObjectId(1),
            attr: 0,
            payload: EventPayload::ValueChanged {
                new: Value::Int(n),
                old: Value::Int(n - 1),
            },
        }
    }

    #[test]
    fn test_passive_sink_records_in_order() {
        let sink = PassiveSink::new();
        sink.post(event(1));
        sink.post(event(2));
        assert_eq!(sink.len(), 2);
        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert!(sink.is_empty());
        assert!(matches!(
            &drained[0].payload,
            EventPayload::ValueChanged { new: Value::Int(1), .. }
        ));
    }

    #[test]
    fn test_notify_guarded_contains_panics() {
        notify_guarded("test", || panic!("listener bug"));
        // Reaching here is the assertion.
    }
}
