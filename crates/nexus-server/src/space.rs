//! Hosted objects and event fan-out to their subscribers.
//!
//! Publishing an object binds its attributes to a [`BroadcastSink`].
//! From then on every mutation, wherever it happens on the server,
//! turns into one encoded frame that is cloned to each subscribed
//! connection's outbound queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use nexus_object::{init_attributes, snapshot, EventSink, NexusObject};
use nexus_wire::{
    frame, BinWriter, Downstream, EventRecord, ObjectId, ObjectSnapshot,
    Registry,
};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Fans encoded events out to subscriber queues. Dead subscribers are
/// dropped on the next post.
pub struct BroadcastSink {
    registry: Arc<Registry>,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl BroadcastSink {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(
        &self,
        subscriber: u64,
        tx: mpsc::UnboundedSender<Vec<u8>>,
    ) {
        self.subscribers.lock().unwrap().insert(subscriber, tx);
    }

    pub fn unsubscribe(&self, subscriber: u64) -> bool {
        self.subscribers.lock().unwrap().remove(&subscriber).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl EventSink for BroadcastSink {
    fn post(&self, event: EventRecord) {
        let mut w = BinWriter::new();
        let framed = Downstream::Event(event)
            .write(&mut w, &self.registry)
            .and_then(|()| frame(&w.into_bytes()));
        let framed = match framed {
            Ok(framed) => framed,
            Err(err) => {
                error!(%err, "event not encodable, dropping");
                return;
            }
        };
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|subscriber, tx| {
            if tx.send(framed.clone()).is_ok() {
                true
            } else {
                warn!(subscriber, "subscriber gone, dropping");
                false
            }
        });
    }
}

struct Published {
    object: Arc<Mutex<dyn NexusObject>>,
    sink: Arc<BroadcastSink>,
}

/// The table of objects this server hosts, keyed by object id.
pub struct ObjectSpace {
    registry: Arc<Registry>,
    next_id: AtomicU32,
    objects: Mutex<HashMap<ObjectId, Published>>,
}

impl ObjectSpace {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            next_id: AtomicU32::new(1),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Publishes an object: assigns it an id, binds its attributes to
    /// a broadcast sink, and makes it subscribable. The returned
    /// handle is for server-side mutation.
    pub fn publish<O: NexusObject>(
        &self,
        mut object: O,
    ) -> (ObjectId, Arc<Mutex<O>>) {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let sink = Arc::new(BroadcastSink::new(self.registry.clone()));
        init_attributes(&mut object, id, sink.clone() as Arc<dyn EventSink>);

        let object = Arc::new(Mutex::new(object));
        self.objects.lock().unwrap().insert(
            id,
            Published {
                object: object.clone(),
                sink,
            },
        );
        (id, object)
    }

    /// Withdraws an object. Existing subscribers stop receiving
    /// events; their proxies simply go stale.
    pub fn withdraw(&self, id: ObjectId) -> bool {
        self.objects.lock().unwrap().remove(&id).is_some()
    }

    /// Runs `f` against the hosted object under its lock.
    pub fn with<R>(
        &self,
        id: ObjectId,
        f: impl FnOnce(&mut dyn NexusObject) -> R,
    ) -> Option<R> {
        let object = {
            let objects = self.objects.lock().unwrap();
            objects.get(&id).map(|p| p.object.clone())
        };
        object.map(|object| {
            let mut guard = object.lock().unwrap();
            f(&mut *guard)
        })
    }

    /// Captures the current state of a hosted object.
    pub fn snapshot(&self, id: ObjectId) -> Option<ObjectSnapshot> {
        self.with(id, |object| snapshot(object, id))
    }

    /// Attaches a subscriber queue to an object's sink and returns its
    /// snapshot, atomically enough that no event between the two is
    /// lost: the sink is subscribed first, under the same object lock
    /// that mutators take.
    pub fn attach_subscriber(
        &self,
        id: ObjectId,
        subscriber: u64,
        tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Option<ObjectSnapshot> {
        let published = {
            let objects = self.objects.lock().unwrap();
            objects
                .get(&id)
                .map(|p| (p.object.clone(), p.sink.clone()))
        };
        let (object, sink) = published?;
        let mut guard = object.lock().unwrap();
        sink.subscribe(subscriber, tx);
        Some(snapshot(&mut *guard, id))
    }

    /// Detaches one subscriber from one object.
    pub fn detach_subscriber(&self, id: ObjectId, subscriber: u64) -> bool {
        let sink = {
            let objects = self.objects.lock().unwrap();
            objects.get(&id).map(|p| p.sink.clone())
        };
        sink.is_some_and(|sink| sink.unsubscribe(subscriber))
    }

    /// Detaches a subscriber from every object; used when a connection
    /// goes away.
    pub fn drop_subscriber(&self, subscriber: u64) {
        let sinks: Vec<Arc<BroadcastSink>> = {
            let objects = self.objects.lock().unwrap();
            objects.values().map(|p| p.sink.clone()).collect()
        };
        for sink in sinks {
            sink.unsubscribe(subscriber);
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_object::{DAttribute, DValue};
    use nexus_wire::{BinReader, EventPayload, Value};

    #[derive(Default)]
    struct Gauge {
        level: DValue<i32>,
    }

    impl NexusObject for Gauge {
        fn visit_attributes(
            &mut self,
            visit: &mut dyn FnMut(&mut dyn DAttribute),
        ) {
            visit(&mut self.level);
        }
    }

    fn decode_event(registry: &Registry, framed: &[u8]) -> EventRecord {
        let mut frames = nexus_wire::FrameReader::new();
        frames.feed(framed);
        let payload = frames.next_frame().unwrap().unwrap();
        let mut r = BinReader::new(&payload);
        match Downstream::read(&mut r, registry).unwrap() {
            Downstream::Event(record) => record,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mutation_reaches_every_subscriber() {
        let registry = Arc::new(Registry::new());
        let space = ObjectSpace::new(registry.clone());
        let (id, gauge) = space.publish(Gauge::default());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        space.attach_subscriber(id, 1, tx_a).unwrap();
        space.attach_subscriber(id, 2, tx_b).unwrap();

        gauge.lock().unwrap().level.set(7);

        for rx in [&mut rx_a, &mut rx_b] {
            let framed = rx.try_recv().unwrap();
            let record = decode_event(&registry, &framed);
            assert_eq!(record.object, id);
            assert_eq!(
                record.payload,
                EventPayload::ValueChanged {
                    new: Value::Int(7),
                    old: Value::Int(0),
                }
            );
        }
    }

    #[tokio::test]
    async fn test_snapshot_reflects_state_at_attach() {
        let registry = Arc::new(Registry::new());
        let space = ObjectSpace::new(registry);
        let (id, gauge) = space.publish(Gauge::default());
        gauge.lock().unwrap().level.set(3);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let snapshot = space.attach_subscriber(id, 1, tx).unwrap();
        assert_eq!(snapshot.attrs, vec![Some(Value::Int(3))]);
        assert!(rx.try_recv().is_err(), "no events before attach arrive");
    }

    #[tokio::test]
    async fn test_detached_subscriber_stops_receiving() {
        let registry = Arc::new(Registry::new());
        let space = ObjectSpace::new(registry);
        let (id, gauge) = space.publish(Gauge::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        space.attach_subscriber(id, 1, tx).unwrap();
        assert!(space.detach_subscriber(id, 1));
        assert!(!space.detach_subscriber(id, 1));

        gauge.lock().unwrap().level.set(7);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_attach_to_unknown_object_fails() {
        let space = ObjectSpace::new(Arc::new(Registry::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(space.attach_subscriber(ObjectId(99), 1, tx).is_none());
    }

    #[tokio::test]
    async fn test_withdraw_stops_events() {
        let registry = Arc::new(Registry::new());
        let space = ObjectSpace::new(registry);
        let (id, _gauge) = space.publish(Gauge::default());
        assert_eq!(space.object_count(), 1);

        assert!(space.withdraw(id));
        assert!(space.snapshot(id).is_none());
        assert_eq!(space.object_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_distinct() {
        let space = ObjectSpace::new(Arc::new(Registry::new()));
        let (a, _) = space.publish(Gauge::default());
        let (b, _) = space.publish(Gauge::default());
        assert_ne!(a, b);
    }
}
