//! Delivery of decoded remote events into local object instances, and
//! the seam that decides which thread runs the resulting callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nexus_wire::{EventRecord, ObjectId};
use tracing::warn;

use crate::object::{apply_event, NexusObject};
use crate::ObjectError;

/// Runs callbacks on the thread that owns application state.
///
/// The connection runtime hands every completed delivery through this
/// trait before listeners fire, so an application with a dedicated UI
/// or game-loop thread can marshal there by injecting its own
/// implementation.
pub trait Dispatcher: Send + Sync {
    fn run(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs callbacks directly on the calling task. The default: listeners
/// fire on the read loop, in arrival order.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn run(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// A shared table of proxy instances, keyed by the remote object they
/// replicate. Events for unknown objects are logged and dropped; a
/// subscription may have been torn down while events were in flight.
#[derive(Default)]
pub struct ProxyTable {
    objects: Mutex<HashMap<ObjectId, Arc<Mutex<dyn NexusObject>>>>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ObjectId, object: Arc<Mutex<dyn NexusObject>>) {
        self.objects.lock().unwrap().insert(id, object);
    }

    pub fn remove(&self, id: ObjectId) -> bool {
        self.objects.lock().unwrap().remove(&id).is_some()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.lock().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }

    /// Drops every proxy at once; used when a connection closes.
    pub fn clear(&self) {
        self.objects.lock().unwrap().clear();
    }

    /// Applies an event to whichever proxy replicates the addressed
    /// object.
    pub fn deliver(&self, record: EventRecord) -> Result<(), ObjectError> {
        let object = {
            let table = self.objects.lock().unwrap();
            table.get(&record.object).cloned()
        };
        match object {
            Some(object) => {
                let mut guard = object.lock().unwrap();
                apply_event(&mut *guard, record)
            }
            None => {
                warn!(object = record.object.0, "event for unknown object");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{DAttribute, DValue};
    use nexus_wire::{EventPayload, Value};

    #[derive(Default)]
    struct Counter {
        count: DValue<i32>,
    }

    impl NexusObject for Counter {
        fn visit_attributes(
            &mut self,
            visit: &mut dyn FnMut(&mut dyn DAttribute),
        ) {
            visit(&mut self.count);
        }
    }

    fn changed(object: u32, new: i32) -> EventRecord {
        EventRecord {
            object: ObjectId(object),
            attr: 0,
            payload: EventPayload::ValueChanged {
                new: Value::Int(new),
                old: Value::Int(0),
            },
        }
    }

    #[test]
    fn test_delivers_to_registered_instance() {
        let table = ProxyTable::new();
        let counter: Arc<Mutex<Counter>> =
            Arc::new(Mutex::new(Counter::default()));
        table.insert(ObjectId(1), counter.clone());

        table.deliver(changed(1, 5)).unwrap();
        assert_eq!(counter.lock().unwrap().count.get(), 5);
    }

    #[test]
    fn test_unknown_object_is_dropped_silently() {
        let table = ProxyTable::new();
        assert!(table.deliver(changed(99, 1)).is_ok());
    }

    #[test]
    fn test_removed_instance_no_longer_receives() {
        let table = ProxyTable::new();
        let counter: Arc<Mutex<Counter>> =
            Arc::new(Mutex::new(Counter::default()));
        table.insert(ObjectId(1), counter.clone());
        assert!(table.remove(ObjectId(1)));
        assert!(!table.remove(ObjectId(1)));

        table.deliver(changed(1, 5)).unwrap();
        assert_eq!(counter.lock().unwrap().count.get(), 0);
    }

    #[test]
    fn test_clear_empties_the_table() {
        let table = ProxyTable::new();
        table.insert(ObjectId(1), Arc::new(Mutex::new(Counter::default())));
        table.insert(ObjectId(2), Arc::new(Mutex::new(Counter::default())));
        assert_eq!(table.len(), 2);

        table.clear();
        assert!(table.is_empty());
        assert!(!table.contains(ObjectId(1)));
    }

    #[test]
    fn test_inline_dispatcher_runs_immediately() {
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        InlineDispatcher.run(Box::new(move || *flag.lock().unwrap() = true));
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn test_custom_dispatcher_defers_until_drained() {
        #[derive(Default)]
        struct QueueDispatcher {
            tasks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
        }

        impl QueueDispatcher {
            fn drain(&self) {
                let tasks: Vec<_> =
                    std::mem::take(&mut *self.tasks.lock().unwrap());
                for task in tasks {
                    task();
                }
            }
        }

        impl Dispatcher for QueueDispatcher {
            fn run(&self, task: Box<dyn FnOnce() + Send>) {
                self.tasks.lock().unwrap().push(task);
            }
        }

        let dispatcher = QueueDispatcher::default();
        let applied = Arc::new(Mutex::new(0));
        let slot = applied.clone();
        dispatcher.run(Box::new(move || *slot.lock().unwrap() += 1));

        assert_eq!(*applied.lock().unwrap(), 0, "deferred until drained");
        dispatcher.drain();
        assert_eq!(*applied.lock().unwrap(), 1);
    }
}
