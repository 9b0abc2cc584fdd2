//! The logical message kinds that cross a connection.
//!
//! [`Upstream`] travels client→server, [`Downstream`] server→client.
//! Both are hand-coded against the stream traits, so one codec drives
//! the binary-framed form and both text forms.

use std::fmt;

use crate::registry::Registry;
use crate::stream::{StreamReader, StreamWriter};
use crate::value::{TypeCode, Value};
use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A server-assigned identifier for a published object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O-{}", self.0)
    }
}

/// The wire-level form of an object address: which host, which object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRec {
    pub host: String,
    pub id: ObjectId,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// The payload of an attribute mutation event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A `DValue` changed.
    ValueChanged { new: Value, old: Value },
    /// A `DMap` entry was put; `old` is the pre-mutation value, absent
    /// for a new key.
    EntryPut {
        key: Value,
        value: Value,
        old: Option<Value>,
    },
    /// A `DMap` entry was removed.
    EntryRemoved { key: Value, old: Value },
}

/// A serializable record of one attribute mutation, routed to its
/// target purely by object id and attribute index.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub object: ObjectId,
    pub attr: u16,
    pub payload: EventPayload,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// The state transferred on subscribe: one entry per attribute index,
/// `None` for stateless attributes (services).
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    pub attrs: Vec<Option<Value>>,
}

// ---------------------------------------------------------------------------
// Upstream / Downstream
// ---------------------------------------------------------------------------

/// Client→server messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Upstream {
    /// Attach to a remote object and start receiving its events.
    Subscribe { req_id: u32, addr: AddressRec },
    /// Stop receiving events for an object.
    Unsubscribe { id: ObjectId },
    /// Invoke a bound service method.
    ServiceCall {
        call_id: u32,
        service: TypeCode,
        method: u8,
        args: Vec<Value>,
    },
}

/// Server→client messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Downstream {
    /// An attribute mutation on a subscribed object.
    Event(EventRecord),
    /// The outcome of a subscribe request.
    SubscribeResult {
        req_id: u32,
        result: Result<ObjectSnapshot, String>,
    },
    /// The outcome of a service call.
    CallResult {
        call_id: u32,
        result: Result<Value, String>,
    },
}

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

fn write_u32(w: &mut dyn StreamWriter, v: u32) -> Result<(), ProtocolError> {
    w.write_int(v as i32)
}

fn read_u32(r: &mut dyn StreamReader) -> Result<u32, ProtocolError> {
    Ok(r.read_int()? as u32)
}

fn write_attr(w: &mut dyn StreamWriter, v: u16) -> Result<(), ProtocolError> {
    w.write_short(v as i16)
}

fn read_attr(r: &mut dyn StreamReader) -> Result<u16, ProtocolError> {
    Ok(r.read_short()? as u16)
}

fn write_opt_value(
    w: &mut dyn StreamWriter,
    registry: &Registry,
    v: &Option<Value>,
) -> Result<(), ProtocolError> {
    match v {
        None => w.write_bool(false),
        Some(value) => {
            w.write_bool(true)?;
            registry.write_value(w, value)
        }
    }
}

fn read_opt_value(
    r: &mut dyn StreamReader,
    registry: &Registry,
) -> Result<Option<Value>, ProtocolError> {
    if r.read_bool()? {
        Ok(Some(registry.read_value(r)?))
    } else {
        Ok(None)
    }
}

/// Service-call arguments may mix types, so each one is written
/// self-describing rather than as a homogeneous list.
fn write_args(
    w: &mut dyn StreamWriter,
    registry: &Registry,
    args: &[Value],
) -> Result<(), ProtocolError> {
    w.write_short(args.len() as i16)?;
    for arg in args {
        registry.write_value(w, arg)?;
    }
    Ok(())
}

fn read_args(
    r: &mut dyn StreamReader,
    registry: &Registry,
) -> Result<Vec<Value>, ProtocolError> {
    let count = r.read_short()?;
    if count < 0 {
        return Err(ProtocolError::Decode(format!(
            "negative argument count {count}"
        )));
    }
    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        args.push(registry.read_value(r)?);
    }
    Ok(args)
}

impl AddressRec {
    pub fn write(
        &self,
        w: &mut dyn StreamWriter,
    ) -> Result<(), ProtocolError> {
        w.write_string(Some(&self.host))?;
        write_u32(w, self.id.0)
    }

    pub fn read(r: &mut dyn StreamReader) -> Result<Self, ProtocolError> {
        let host = r.read_string()?.ok_or_else(|| {
            ProtocolError::Decode("address host is null".into())
        })?;
        let id = ObjectId(read_u32(r)?);
        Ok(Self { host, id })
    }
}

impl EventPayload {
    fn tag(&self) -> i8 {
        match self {
            EventPayload::ValueChanged { .. } => 1,
            EventPayload::EntryPut { .. } => 2,
            EventPayload::EntryRemoved { .. } => 3,
        }
    }

    pub fn write(
        &self,
        w: &mut dyn StreamWriter,
        registry: &Registry,
    ) -> Result<(), ProtocolError> {
        w.write_byte(self.tag())?;
        match self {
            EventPayload::ValueChanged { new, old } => {
                registry.write_value(w, new)?;
                registry.write_value(w, old)
            }
            EventPayload::EntryPut { key, value, old } => {
                registry.write_value(w, key)?;
                registry.write_value(w, value)?;
                write_opt_value(w, registry, old)
            }
            EventPayload::EntryRemoved { key, old } => {
                registry.write_value(w, key)?;
                registry.write_value(w, old)
            }
        }
    }

    pub fn read(
        r: &mut dyn StreamReader,
        registry: &Registry,
    ) -> Result<Self, ProtocolError> {
        match r.read_byte()? {
            1 => Ok(EventPayload::ValueChanged {
                new: registry.read_value(r)?,
                old: registry.read_value(r)?,
            }),
            2 => Ok(EventPayload::EntryPut {
                key: registry.read_value(r)?,
                value: registry.read_value(r)?,
                old: read_opt_value(r, registry)?,
            }),
            3 => Ok(EventPayload::EntryRemoved {
                key: registry.read_value(r)?,
                old: registry.read_value(r)?,
            }),
            tag => Err(ProtocolError::UnknownTag {
                what: "event payload",
                tag: tag as i16,
            }),
        }
    }
}

impl EventRecord {
    pub fn write(
        &self,
        w: &mut dyn StreamWriter,
        registry: &Registry,
    ) -> Result<(), ProtocolError> {
        write_u32(w, self.object.0)?;
        write_attr(w, self.attr)?;
        self.payload.write(w, registry)
    }

    pub fn read(
        r: &mut dyn StreamReader,
        registry: &Registry,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            object: ObjectId(read_u32(r)?),
            attr: read_attr(r)?,
            payload: EventPayload::read(r, registry)?,
        })
    }
}

impl ObjectSnapshot {
    pub fn write(
        &self,
        w: &mut dyn StreamWriter,
        registry: &Registry,
    ) -> Result<(), ProtocolError> {
        write_u32(w, self.id.0)?;
        w.write_short(self.attrs.len() as i16)?;
        for attr in &self.attrs {
            write_opt_value(w, registry, attr)?;
        }
        Ok(())
    }

    pub fn read(
        r: &mut dyn StreamReader,
        registry: &Registry,
    ) -> Result<Self, ProtocolError> {
        let id = ObjectId(read_u32(r)?);
        let count = r.read_short()?;
        if count < 0 {
            return Err(ProtocolError::Decode(format!(
                "negative attribute count {count}"
            )));
        }
        let mut attrs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            attrs.push(read_opt_value(r, registry)?);
        }
        Ok(Self { id, attrs })
    }
}

fn write_result<T>(
    w: &mut dyn StreamWriter,
    result: &Result<T, String>,
    write_ok: impl FnOnce(&mut dyn StreamWriter, &T) -> Result<(), ProtocolError>,
) -> Result<(), ProtocolError> {
    match result {
        Ok(value) => {
            w.write_bool(true)?;
            write_ok(w, value)
        }
        Err(message) => {
            w.write_bool(false)?;
            w.write_string(Some(message))
        }
    }
}

fn read_result<T>(
    r: &mut dyn StreamReader,
    read_ok: impl FnOnce(&mut dyn StreamReader) -> Result<T, ProtocolError>,
) -> Result<Result<T, String>, ProtocolError> {
    if r.read_bool()? {
        Ok(Ok(read_ok(r)?))
    } else {
        let message = r.read_string()?.unwrap_or_default();
        Ok(Err(message))
    }
}

impl Upstream {
    pub fn write(
        &self,
        w: &mut dyn StreamWriter,
        registry: &Registry,
    ) -> Result<(), ProtocolError> {
        match self {
            Upstream::Subscribe { req_id, addr } => {
                w.write_byte(1)?;
                write_u32(w, *req_id)?;
                addr.write(w)
            }
            Upstream::Unsubscribe { id } => {
                w.write_byte(2)?;
                write_u32(w, id.0)
            }
            Upstream::ServiceCall {
                call_id,
                service,
                method,
                args,
            } => {
                w.write_byte(3)?;
                write_u32(w, *call_id)?;
                w.write_short(service.0)?;
                w.write_byte(*method as i8)?;
                write_args(w, registry, args)
            }
        }
    }

    pub fn read(
        r: &mut dyn StreamReader,
        registry: &Registry,
    ) -> Result<Self, ProtocolError> {
        match r.read_byte()? {
            1 => Ok(Upstream::Subscribe {
                req_id: read_u32(r)?,
                addr: AddressRec::read(r)?,
            }),
            2 => Ok(Upstream::Unsubscribe {
                id: ObjectId(read_u32(r)?),
            }),
            3 => Ok(Upstream::ServiceCall {
                call_id: read_u32(r)?,
                service: TypeCode(r.read_short()?),
                method: r.read_byte()? as u8,
                args: read_args(r, registry)?,
            }),
            tag => Err(ProtocolError::UnknownTag {
                what: "upstream",
                tag: tag as i16,
            }),
        }
    }
}

impl Downstream {
    pub fn write(
        &self,
        w: &mut dyn StreamWriter,
        registry: &Registry,
    ) -> Result<(), ProtocolError> {
        match self {
            Downstream::Event(record) => {
                w.write_byte(1)?;
                record.write(w, registry)
            }
            Downstream::SubscribeResult { req_id, result } => {
                w.write_byte(2)?;
                write_u32(w, *req_id)?;
                write_result(w, result, |w, snapshot| {
                    snapshot.write(w, registry)
                })
            }
            Downstream::CallResult { call_id, result } => {
                w.write_byte(3)?;
                write_u32(w, *call_id)?;
                write_result(w, result, |w, value| {
                    registry.write_value(w, value)
                })
            }
        }
    }

    pub fn read(
        r: &mut dyn StreamReader,
        registry: &Registry,
    ) -> Result<Self, ProtocolError> {
        match r.read_byte()? {
            1 => Ok(Downstream::Event(EventRecord::read(r, registry)?)),
            2 => Ok(Downstream::SubscribeResult {
                req_id: read_u32(r)?,
                result: read_result(r, |r| ObjectSnapshot::read(r, registry))?,
            }),
            3 => Ok(Downstream::CallResult {
                call_id: read_u32(r)?,
                result: read_result(r, |r| registry.read_value(r))?,
            }),
            tag => Err(ProtocolError::UnknownTag {
                what: "downstream",
                tag: tag as i16,
            }),
        }
    }
}
