//! Synchronized attributes: the `DAttribute` contract plus the value
//! and map variants.
//!
//! An attribute belongs to exactly one object, which binds it with an
//! owner id, an index, and an event sink at initialization. Mutating
//! an attribute is synchronous locally: the backing store changes,
//! listeners fire in registration order on the calling thread, and the
//! event is posted to the sink before the mutator returns.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use nexus_wire::{EventPayload, EventRecord, ObjectId, Value};

use crate::event::{notify_guarded, EventSink};
use crate::ObjectError;

// ---------------------------------------------------------------------------
// Datum
// ---------------------------------------------------------------------------

/// A Rust type that maps onto one wire value kind and can live inside
/// a synchronized attribute.
pub trait Datum: Clone + Send + 'static {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, ObjectError>;
}

macro_rules! scalar_datum {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl Datum for $ty {
            fn to_value(&self) -> Value {
                Value::$variant(*self)
            }

            fn from_value(value: Value) -> Result<Self, ObjectError> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(ObjectError::WrongKind {
                        expected: $expected,
                        found: format!("{other:?}"),
                    }),
                }
            }
        }
    };
}

scalar_datum!(bool, Bool, "bool");
scalar_datum!(i8, Byte, "byte");
scalar_datum!(i16, Short, "short");
scalar_datum!(char, Char, "char");
scalar_datum!(i32, Int, "int");
scalar_datum!(i64, Long, "long");
scalar_datum!(f32, Float, "float");
scalar_datum!(f64, Double, "double");

impl Datum for String {
    fn to_value(&self) -> Value {
        Value::String(Some(self.clone()))
    }

    fn from_value(value: Value) -> Result<Self, ObjectError> {
        match value {
            Value::String(Some(s)) => Ok(s),
            other => Err(ObjectError::WrongKind {
                expected: "non-null string",
                found: format!("{other:?}"),
            }),
        }
    }
}

impl Datum for Option<String> {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ObjectError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(ObjectError::WrongKind {
                expected: "string",
                found: format!("{other:?}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// DAttribute
// ---------------------------------------------------------------------------

/// One synchronized attribute of a distributed object.
pub trait DAttribute: Send {
    /// Binds the attribute to its owner. Called exactly once, by
    /// attribute-initialization order; the index never changes after.
    fn bind(&mut self, owner: ObjectId, index: u16, sink: Arc<dyn EventSink>);

    /// The index assigned at bind time (0 before binding).
    fn index(&self) -> u16;

    /// Applies a decoded event payload: mutates the backing store and
    /// fires listeners, without re-posting to the sink.
    fn apply(&mut self, payload: EventPayload) -> Result<(), ObjectError>;

    /// The attribute's current state for subscribe transfer, or `None`
    /// for stateless attributes.
    fn snapshot(&self) -> Option<Value>;

    /// Replaces the backing store from a snapshot. No events fire.
    fn restore(&mut self, snapshot: Option<Value>) -> Result<(), ObjectError>;

    /// Installs the transport hook for callable attributes. Stateful
    /// attributes ignore this.
    fn attach_caller(&mut self, _caller: Arc<dyn crate::ServiceCaller>) {}
}

/// Owner identity installed by `bind`.
#[derive(Clone)]
pub(crate) struct Binding {
    pub owner: ObjectId,
    pub index: u16,
    pub sink: Arc<dyn EventSink>,
}

impl Binding {
    fn post(&self, payload: EventPayload) {
        self.sink.post(EventRecord {
            object: self.owner,
            attr: self.index,
            payload,
        });
    }
}

// ---------------------------------------------------------------------------
// Listener registries
// ---------------------------------------------------------------------------

/// Identity handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

pub(crate) struct Listeners<F: ?Sized> {
    entries: Vec<(ListenerKey, Box<F>)>,
    next: u64,
}

impl<F: ?Sized> Listeners<F> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next: 1,
        }
    }

    pub fn add(&mut self, listener: Box<F>) -> ListenerKey {
        let key = ListenerKey(self.next);
        self.next += 1;
        self.entries.push((key, listener));
        key
    }

    pub fn remove(&mut self, key: ListenerKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| *k != key);
        self.entries.len() != before
    }

    /// Registration-order iteration.
    pub fn iter(&self) -> impl Iterator<Item = &F> {
        self.entries.iter().map(|(_, f)| f.as_ref())
    }
}

// ---------------------------------------------------------------------------
// DValue
// ---------------------------------------------------------------------------

/// A single synchronized value.
pub struct DValue<T: Datum> {
    value: T,
    binding: Option<Binding>,
    listeners: Listeners<dyn Fn(&T, &T) + Send>,
}

impl<T: Datum> DValue<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: initial,
            binding: None,
            listeners: Listeners::new(),
        }
    }

    /// The current value.
    pub fn get(&self) -> T {
        self.value.clone()
    }

    /// Replaces the value, fires changed-listeners `(new, old)` in
    /// registration order, then posts the event. Returns the previous
    /// value.
    pub fn set(&mut self, value: T) -> T {
        let old = std::mem::replace(&mut self.value, value);
        self.fire(&old);
        if let Some(binding) = &self.binding {
            binding.post(EventPayload::ValueChanged {
                new: self.value.to_value(),
                old: old.to_value(),
            });
        }
        old
    }

    /// Registers a changed-listener; returns its removal key.
    pub fn on_change(
        &mut self,
        listener: impl Fn(&T, &T) + Send + 'static,
    ) -> ListenerKey {
        self.listeners.add(Box::new(listener))
    }

    /// Removes a listener by identity. Returns `false` if the key was
    /// already gone.
    pub fn remove_listener(&mut self, key: ListenerKey) -> bool {
        self.listeners.remove(key)
    }

    fn fire(&self, old: &T) {
        for listener in self.listeners.iter() {
            notify_guarded("value-changed", || listener(&self.value, old));
        }
    }
}

impl<T: Datum + Default> Default for DValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Datum + fmt::Debug> fmt::Debug for DValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DValue").field("value", &self.value).finish()
    }
}

impl<T: Datum> DAttribute for DValue<T> {
    fn bind(&mut self, owner: ObjectId, index: u16, sink: Arc<dyn EventSink>) {
        self.binding = Some(Binding { owner, index, sink });
    }

    fn index(&self) -> u16 {
        self.binding.as_ref().map_or(0, |b| b.index)
    }

    fn apply(&mut self, payload: EventPayload) -> Result<(), ObjectError> {
        let EventPayload::ValueChanged { new, .. } = payload else {
            return Err(ObjectError::NotApplicable("value"));
        };
        let new = T::from_value(new)?;
        let old = std::mem::replace(&mut self.value, new);
        self.fire(&old);
        Ok(())
    }

    fn snapshot(&self) -> Option<Value> {
        Some(self.value.to_value())
    }

    fn restore(&mut self, snapshot: Option<Value>) -> Result<(), ObjectError> {
        let value = snapshot.ok_or_else(|| {
            ObjectError::BadSnapshot("value attribute expects state".into())
        })?;
        self.value = T::from_value(value)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DMap
// ---------------------------------------------------------------------------

/// A synchronized key→value mapping. Keys are unique; iteration order
/// is not part of the contract.
pub struct DMap<K, V>
where
    K: Datum + Eq + Hash,
    V: Datum + PartialEq,
{
    entries: HashMap<K, V>,
    binding: Option<Binding>,
    put_listeners: Listeners<dyn Fn(&K, &V, Option<&V>) + Send>,
    removed_listeners: Listeners<dyn Fn(&K, &V) + Send>,
}

impl<K, V> DMap<K, V>
where
    K: Datum + Eq + Hash,
    V: Datum + PartialEq,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            binding: None,
            put_listeners: Listeners::new(),
            removed_listeners: Listeners::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    /// Inserts or replaces an entry. The generated event carries the
    /// value that was in place *before* this mutation (absent for a
    /// new key). Returns that previous value.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        let old = self.entries.insert(key.clone(), value.clone());
        self.fire_put(&key, &value, old.as_ref());
        if let Some(binding) = &self.binding {
            binding.post(EventPayload::EntryPut {
                key: key.to_value(),
                value: value.to_value(),
                old: old.as_ref().map(Datum::to_value),
            });
        }
        old
    }

    /// Removes an entry. Removing a missing key is a silent no-op:
    /// no event, no listener call, `None` returned.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let old = self.entries.remove(key)?;
        self.fire_removed(key, &old);
        if let Some(binding) = &self.binding {
            binding.post(EventPayload::EntryRemoved {
                key: key.to_value(),
                old: old.to_value(),
            });
        }
        Some(old)
    }

    /// Registers a put-listener `(key, value, old)`; returns its
    /// removal key.
    pub fn on_put(
        &mut self,
        listener: impl Fn(&K, &V, Option<&V>) + Send + 'static,
    ) -> ListenerKey {
        self.put_listeners.add(Box::new(listener))
    }

    /// Registers a removed-listener `(key, old)`; returns its removal
    /// key.
    pub fn on_removed(
        &mut self,
        listener: impl Fn(&K, &V) + Send + 'static,
    ) -> ListenerKey {
        self.removed_listeners.add(Box::new(listener))
    }

    /// Removes a put-listener by identity.
    pub fn remove_put_listener(&mut self, key: ListenerKey) -> bool {
        self.put_listeners.remove(key)
    }

    /// Removes a removed-listener by identity.
    pub fn remove_removed_listener(&mut self, key: ListenerKey) -> bool {
        self.removed_listeners.remove(key)
    }

    fn fire_put(&self, key: &K, value: &V, old: Option<&V>) {
        for listener in self.put_listeners.iter() {
            notify_guarded("entry-put", || listener(key, value, old));
        }
    }

    fn fire_removed(&self, key: &K, old: &V) {
        for listener in self.removed_listeners.iter() {
            notify_guarded("entry-removed", || listener(key, old));
        }
    }
}

impl<K, V> Default for DMap<K, V>
where
    K: Datum + Eq + Hash,
    V: Datum + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> DAttribute for DMap<K, V>
where
    K: Datum + Eq + Hash,
    V: Datum + PartialEq,
{
    fn bind(&mut self, owner: ObjectId, index: u16, sink: Arc<dyn EventSink>) {
        self.binding = Some(Binding { owner, index, sink });
    }

    fn index(&self) -> u16 {
        self.binding.as_ref().map_or(0, |b| b.index)
    }

    fn apply(&mut self, payload: EventPayload) -> Result<(), ObjectError> {
        match payload {
            EventPayload::EntryPut { key, value, .. } => {
                let key = K::from_value(key)?;
                let value = V::from_value(value)?;
                let old = self.entries.insert(key.clone(), value.clone());
                self.fire_put(&key, &value, old.as_ref());
                Ok(())
            }
            EventPayload::EntryRemoved { key, .. } => {
                let key = K::from_value(key)?;
                if let Some(old) = self.entries.remove(&key) {
                    self.fire_removed(&key, &old);
                }
                Ok(())
            }
            EventPayload::ValueChanged { .. } => {
                Err(ObjectError::NotApplicable("map"))
            }
        }
    }

    fn snapshot(&self) -> Option<Value> {
        let mut keys = Vec::with_capacity(self.entries.len());
        let mut values = Vec::with_capacity(self.entries.len());
        for (k, v) in &self.entries {
            keys.push(k.to_value());
            values.push(v.to_value());
        }
        Some(Value::List(vec![Value::List(keys), Value::List(values)]))
    }

    fn restore(&mut self, snapshot: Option<Value>) -> Result<(), ObjectError> {
        let Some(Value::List(mut lists)) = snapshot else {
            return Err(ObjectError::BadSnapshot(
                "map attribute expects a key/value list pair".into(),
            ));
        };
        if lists.len() != 2 {
            return Err(ObjectError::BadSnapshot(format!(
                "map snapshot has {} lists, expected 2",
                lists.len()
            )));
        }
        let (Value::List(keys), Value::List(values)) =
            (lists.remove(0), lists.remove(0))
        else {
            return Err(ObjectError::BadSnapshot(
                "map snapshot entries are not lists".into(),
            ));
        };
        if keys.len() != values.len() {
            return Err(ObjectError::BadSnapshot(format!(
                "map snapshot has {} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        self.entries.clear();
        for (k, v) in keys.into_iter().zip(values) {
            self.entries.insert(K::from_value(k)?, V::from_value(v)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PassiveSink;
    use std::sync::Mutex;

    fn bound<T: Datum + Default>(
        sink: &Arc<PassiveSink>,
    ) -> DValue<T> {
        let mut value = DValue::default();
        value.bind(ObjectId(9), 1, sink.clone() as Arc<dyn EventSink>);
        value
    }

    #[test]
    fn test_set_is_locally_synchronous_and_posts() {
        let sink = Arc::new(PassiveSink::new());
        let mut score: DValue<i32> = bound(&sink);
        let old = score.set(42);
        assert_eq!(old, 0);
        assert_eq!(score.get(), 42);

        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object, ObjectId(9));
        assert_eq!(events[0].attr, 1);
        assert_eq!(
            events[0].payload,
            EventPayload::ValueChanged {
                new: Value::Int(42),
                old: Value::Int(0),
            }
        );
    }

    #[test]
    fn test_value_listeners_fire_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut value: DValue<i32> = DValue::new(0);
        for tag in ["first", "second", "third"] {
            let calls = calls.clone();
            value.on_change(move |_, _| {
                calls.lock().unwrap().push(tag);
            });
        }
        value.set(1);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_listener_removed_by_identity() {
        let calls = Arc::new(Mutex::new(0));
        let mut value: DValue<i32> = DValue::new(0);
        let key = {
            let calls = calls.clone();
            value.on_change(move |_, _| *calls.lock().unwrap() += 1)
        };
        value.set(1);
        assert!(value.remove_listener(key));
        assert!(!value.remove_listener(key));
        value.set(2);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let calls = Arc::new(Mutex::new(0));
        let mut value: DValue<i32> = DValue::new(0);
        value.on_change(|_, _| panic!("bad listener"));
        {
            let calls = calls.clone();
            value.on_change(move |_, _| *calls.lock().unwrap() += 1);
        }
        value.set(5);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(value.get(), 5);
    }

    #[test]
    fn test_map_put_carries_previous_value() {
        let sink = Arc::new(PassiveSink::new());
        let mut map: DMap<String, i32> = DMap::new();
        map.bind(ObjectId(3), 0, sink.clone() as Arc<dyn EventSink>);

        assert_eq!(map.put("a".into(), 1), None);
        assert_eq!(map.put("a".into(), 2), Some(1));
        assert_eq!(map.get(&"a".into()), Some(2));

        let events = sink.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].payload,
            EventPayload::EntryPut {
                key: Value::string("a"),
                value: Value::Int(1),
                old: None,
            }
        );
        assert_eq!(
            events[1].payload,
            EventPayload::EntryPut {
                key: Value::string("a"),
                value: Value::Int(2),
                old: Some(Value::Int(1)),
            }
        );
    }

    #[test]
    fn test_map_remove_missing_key_is_silent() {
        let sink = Arc::new(PassiveSink::new());
        let mut map: DMap<String, i32> = DMap::new();
        map.bind(ObjectId(3), 0, sink.clone() as Arc<dyn EventSink>);

        let fired = Arc::new(Mutex::new(0));
        {
            let fired = fired.clone();
            map.on_removed(move |_, _| *fired.lock().unwrap() += 1);
        }

        assert_eq!(map.remove(&"ghost".into()), None);
        assert_eq!(*fired.lock().unwrap(), 0);
        assert!(sink.is_empty());

        map.put("real".into(), 7);
        sink.drain();
        assert_eq!(map.remove(&"real".into()), Some(7));
        assert_eq!(*fired.lock().unwrap(), 1);
        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].payload,
            EventPayload::EntryRemoved {
                key: Value::string("real"),
                old: Value::Int(7),
            }
        );
    }

    #[test]
    fn test_map_snapshot_restore_round_trip() {
        let mut map: DMap<String, i32> = DMap::new();
        map.put("x".into(), 1);
        map.put("y".into(), 2);

        let snapshot = map.snapshot();
        let mut copy: DMap<String, i32> = DMap::new();
        copy.restore(snapshot).unwrap();
        assert_eq!(copy.len(), 2);
        assert_eq!(copy.get(&"x".into()), Some(1));
        assert_eq!(copy.get(&"y".into()), Some(2));
    }

    #[test]
    fn test_apply_wrong_payload_kind_fails() {
        let mut value: DValue<i32> = DValue::new(0);
        let err = value
            .apply(EventPayload::EntryRemoved {
                key: Value::Int(1),
                old: Value::Int(2),
            })
            .unwrap_err();
        assert!(matches!(err, ObjectError::NotApplicable("value")));
    }

    #[test]
    fn test_apply_wrong_value_kind_fails() {
        let mut value: DValue<i32> = DValue::new(0);
        let err = value
            .apply(EventPayload::ValueChanged {
                new: Value::string("not an int"),
                old: Value::Int(0),
            })
            .unwrap_err();
        assert!(matches!(err, ObjectError::WrongKind { .. }));
    }
}
