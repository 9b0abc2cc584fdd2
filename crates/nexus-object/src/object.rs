//! The distributed-object contract and the operations the runtimes
//! perform on any object through it.
//!
//! An object type declares its attributes once, through
//! [`NexusObject::visit_attributes`]; everything else, from index
//! assignment to snapshot transfer, is derived from that declaration
//! order. Visit order must be stable across processes for the same
//! type, which falls out naturally from visiting struct fields in
//! definition order.

use std::marker::PhantomData;
use std::sync::Arc;

use nexus_wire::{AddressRec, EventRecord, ObjectId, ObjectSnapshot};

use crate::attribute::DAttribute;
use crate::event::EventSink;
use crate::ObjectError;

/// A type whose attributes participate in replication.
pub trait NexusObject: Send + 'static {
    /// Presents every synchronized attribute to the visitor, in a
    /// fixed order. Attribute indices follow this order.
    fn visit_attributes(&mut self, visit: &mut dyn FnMut(&mut dyn DAttribute));
}

/// Binds every attribute of `object` to its owner id and sink,
/// assigning indices in visit order. Runs once per instance, before
/// any mutation.
pub fn init_attributes<O: NexusObject + ?Sized>(
    object: &mut O,
    owner: ObjectId,
    sink: Arc<dyn EventSink>,
) {
    let mut index: u16 = 0;
    object.visit_attributes(&mut |attr| {
        attr.bind(owner, index, sink.clone());
        index += 1;
    });
}

/// The number of synchronized attributes an object declares.
pub fn attribute_count<O: NexusObject + ?Sized>(object: &mut O) -> usize {
    let mut count = 0;
    object.visit_attributes(&mut |_| count += 1);
    count
}

/// Runs `f` against the attribute at `index` of the object known as
/// `owner`.
pub fn with_attribute<O, R>(
    object: &mut O,
    owner: ObjectId,
    index: u16,
    f: impl FnOnce(&mut dyn DAttribute) -> R,
) -> Result<R, ObjectError>
where
    O: NexusObject + ?Sized,
{
    let mut current: u16 = 0;
    let mut found = None;
    let mut f = Some(f);
    object.visit_attributes(&mut |attr| {
        if current == index {
            if let Some(f) = f.take() {
                found = Some(f(attr));
            }
        }
        current += 1;
    });
    found.ok_or(ObjectError::NoSuchAttribute {
        object: owner,
        index,
        count: current as usize,
    })
}

/// Applies a decoded remote event to the addressed attribute. The
/// attribute mutates and fires its listeners; nothing is re-posted.
pub fn apply_event<O: NexusObject + ?Sized>(
    object: &mut O,
    record: EventRecord,
) -> Result<(), ObjectError> {
    with_attribute(object, record.object, record.attr, |a| {
        a.apply(record.payload)
    })?
}

/// Captures the full attribute state of an object for transfer.
pub fn snapshot<O: NexusObject + ?Sized>(
    object: &mut O,
    id: ObjectId,
) -> ObjectSnapshot {
    let mut attrs = Vec::new();
    object.visit_attributes(&mut |attr| attrs.push(attr.snapshot()));
    ObjectSnapshot { id, attrs }
}

/// Loads a snapshot into a fresh instance. Attribute counts must
/// match; no events fire.
pub fn restore<O: NexusObject + ?Sized>(
    object: &mut O,
    snapshot: ObjectSnapshot,
) -> Result<(), ObjectError> {
    let count = attribute_count(object);
    if snapshot.attrs.len() != count {
        return Err(ObjectError::BadSnapshot(format!(
            "snapshot has {} attributes, object declares {}",
            snapshot.attrs.len(),
            count
        )));
    }
    let mut states = snapshot.attrs.into_iter();
    let mut result = Ok(());
    object.visit_attributes(&mut |attr| {
        if result.is_err() {
            return;
        }
        // counts matched above, the iterator cannot run dry
        if let Some(state) = states.next() {
            result = attr.restore(state);
        }
    });
    result
}

/// A typed address of a remote object: where it lives plus what type
/// to build the proxy as.
pub struct Address<O: NexusObject> {
    rec: AddressRec,
    _marker: PhantomData<fn() -> O>,
}

impl<O: NexusObject> Address<O> {
    pub fn new(host: impl Into<String>, id: ObjectId) -> Self {
        Self {
            rec: AddressRec {
                host: host.into(),
                id,
            },
            _marker: PhantomData,
        }
    }

    pub fn host(&self) -> &str {
        &self.rec.host
    }

    pub fn id(&self) -> ObjectId {
        self.rec.id
    }

    pub fn rec(&self) -> &AddressRec {
        &self.rec
    }
}

impl<O: NexusObject> Clone for Address<O> {
    fn clone(&self) -> Self {
        Self {
            rec: self.rec.clone(),
            _marker: PhantomData,
        }
    }
}

impl<O: NexusObject> std::fmt::Debug for Address<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.rec.host, self.rec.id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{DMap, DValue};
    use crate::event::PassiveSink;
    use nexus_wire::{EventPayload, Value};

    #[derive(Default)]
    struct Scoreboard {
        title: DValue<String>,
        round: DValue<i32>,
        scores: DMap<String, i32>,
    }

    impl NexusObject for Scoreboard {
        fn visit_attributes(
            &mut self,
            visit: &mut dyn FnMut(&mut dyn DAttribute),
        ) {
            visit(&mut self.title);
            visit(&mut self.round);
            visit(&mut self.scores);
        }
    }

    #[test]
    fn test_indices_follow_visit_order() {
        let mut board = Scoreboard::default();
        let sink = Arc::new(PassiveSink::new());
        init_attributes(&mut board, ObjectId(7), sink);
        assert_eq!(board.title.index(), 0);
        assert_eq!(board.round.index(), 1);
        assert_eq!(board.scores.index(), 2);
        assert_eq!(attribute_count(&mut board), 3);
    }

    #[test]
    fn test_events_carry_owner_and_index() {
        let mut board = Scoreboard::default();
        let sink = Arc::new(PassiveSink::new());
        init_attributes(&mut board, ObjectId(7), sink.clone());

        board.round.set(3);
        board.scores.put("ada".into(), 10);

        let events = sink.drain();
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].object, events[0].attr), (ObjectId(7), 1));
        assert_eq!((events[1].object, events[1].attr), (ObjectId(7), 2));
    }

    #[test]
    fn test_apply_event_routes_by_index() {
        let mut board = Scoreboard::default();
        apply_event(
            &mut board,
            EventRecord {
                object: ObjectId(7),
                attr: 1,
                payload: EventPayload::ValueChanged {
                    new: Value::Int(5),
                    old: Value::Int(0),
                },
            },
        )
        .unwrap();
        assert_eq!(board.round.get(), 5);
    }

    #[test]
    fn test_apply_event_out_of_range_fails() {
        let mut board = Scoreboard::default();
        let err = apply_event(
            &mut board,
            EventRecord {
                object: ObjectId(7),
                attr: 9,
                payload: EventPayload::ValueChanged {
                    new: Value::Int(5),
                    old: Value::Int(0),
                },
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ObjectError::NoSuchAttribute {
                object: ObjectId(7),
                index: 9,
                count: 3,
            }
        ));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut board = Scoreboard::default();
        board.title.set("finals".into());
        board.round.set(2);
        board.scores.put("ada".into(), 10);
        board.scores.put("lin".into(), 4);

        let snap = snapshot(&mut board, ObjectId(7));
        assert_eq!(snap.id, ObjectId(7));
        assert_eq!(snap.attrs.len(), 3);

        let mut copy = Scoreboard::default();
        restore(&mut copy, snap).unwrap();
        assert_eq!(copy.title.get(), "finals");
        assert_eq!(copy.round.get(), 2);
        assert_eq!(copy.scores.get(&"ada".into()), Some(10));
        assert_eq!(copy.scores.get(&"lin".into()), Some(4));
    }

    #[test]
    fn test_restore_count_mismatch_fails() {
        let mut board = Scoreboard::default();
        let err = restore(
            &mut board,
            ObjectSnapshot {
                id: ObjectId(7),
                attrs: vec![Some(Value::Int(1))],
            },
        )
        .unwrap_err();
        assert!(matches!(err, ObjectError::BadSnapshot(_)));
    }
}
