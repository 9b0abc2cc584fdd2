//! The global code→codec registry and generic value streaming.
//!
//! A [`Streamer`] is the codec for one registered composite type: it
//! writes the type's fields with no per-field type tags (the schema
//! *is* the codec) and reads them back in the same order. Streamers
//! are produced either by a build-time generator or by manual
//! registration; the runtime only ever sees the trait object and never
//! inspects fields reflectively.
//!
//! [`Registry::write_value`] / [`read_value`](Registry::read_value)
//! are the self-describing path: a type code followed by the payload.
//! [`write_values`](Registry::write_values) /
//! [`read_values`](Registry::read_values) stream a homogeneous list
//! with a single type header; the caller contract is that every
//! element shares exactly one runtime type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::stream::{StreamReader, StreamWriter};
use crate::value::{MAX_LIST_LEN, TypeCode, Value};
use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Streamer
// ---------------------------------------------------------------------------

/// The codec for one registered composite type.
pub trait Streamer: Send + Sync {
    /// The type code this codec is registered under.
    fn code(&self) -> TypeCode;

    /// A diagnostic name for logs and errors.
    fn name(&self) -> &str;

    /// Writes the composite's fields, in schema order, with no
    /// per-field type tags.
    fn encode(
        &self,
        fields: &[Value],
        w: &mut dyn StreamWriter,
        registry: &Registry,
    ) -> Result<(), ProtocolError>;

    /// Reads the composite's fields back in schema order.
    fn decode(
        &self,
        r: &mut dyn StreamReader,
        registry: &Registry,
    ) -> Result<Vec<Value>, ProtocolError>;
}

/// The kind of one field in a composite schema.
///
/// `Any` fields are written self-describing (code + payload) via
/// [`Registry::write_value`]; everything else is written bare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    String,
    Any,
}

/// A [`Streamer`] driven by an explicit field schema.
///
/// This is the shape a build-time codec generator emits; tests and
/// applications without a generator register these by hand.
pub struct SchemaStreamer {
    code: TypeCode,
    name: String,
    fields: Vec<FieldKind>,
}

impl SchemaStreamer {
    pub fn new(
        code: TypeCode,
        name: impl Into<String>,
        fields: Vec<FieldKind>,
    ) -> Self {
        Self {
            code,
            name: name.into(),
            fields,
        }
    }
}

impl Streamer for SchemaStreamer {
    fn code(&self) -> TypeCode {
        self.code
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode(
        &self,
        fields: &[Value],
        w: &mut dyn StreamWriter,
        registry: &Registry,
    ) -> Result<(), ProtocolError> {
        if fields.len() != self.fields.len() {
            return Err(ProtocolError::Decode(format!(
                "{}: expected {} fields, got {}",
                self.name,
                self.fields.len(),
                fields.len()
            )));
        }
        for (kind, field) in self.fields.iter().zip(fields) {
            match (kind, field) {
                (FieldKind::Bool, Value::Bool(v)) => w.write_bool(*v)?,
                (FieldKind::Byte, Value::Byte(v)) => w.write_byte(*v)?,
                (FieldKind::Short, Value::Short(v)) => w.write_short(*v)?,
                (FieldKind::Char, Value::Char(v)) => w.write_char(*v)?,
                (FieldKind::Int, Value::Int(v)) => w.write_int(*v)?,
                (FieldKind::Long, Value::Long(v)) => w.write_long(*v)?,
                (FieldKind::Float, Value::Float(v)) => w.write_float(*v)?,
                (FieldKind::Double, Value::Double(v)) => {
                    w.write_double(*v)?
                }
                (FieldKind::String, Value::String(v)) => {
                    w.write_string(v.as_deref())?
                }
                (FieldKind::Any, v) => registry.write_value(w, v)?,
                (kind, field) => {
                    return Err(ProtocolError::Decode(format!(
                        "{}: field kind {:?} does not accept {:?}",
                        self.name, kind, field
                    )));
                }
            }
        }
        Ok(())
    }

    fn decode(
        &self,
        r: &mut dyn StreamReader,
        registry: &Registry,
    ) -> Result<Vec<Value>, ProtocolError> {
        let mut fields = Vec::with_capacity(self.fields.len());
        for kind in &self.fields {
            let value = match kind {
                FieldKind::Bool => Value::Bool(r.read_bool()?),
                FieldKind::Byte => Value::Byte(r.read_byte()?),
                FieldKind::Short => Value::Short(r.read_short()?),
                FieldKind::Char => Value::Char(r.read_char()?),
                FieldKind::Int => Value::Int(r.read_int()?),
                FieldKind::Long => Value::Long(r.read_long()?),
                FieldKind::Float => Value::Float(r.read_float()?),
                FieldKind::Double => Value::Double(r.read_double()?),
                FieldKind::String => Value::String(r.read_string()?),
                FieldKind::Any => registry.read_value(r)?,
            };
            fields.push(value);
        }
        Ok(fields)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps type codes to composite codecs.
///
/// Built-in kinds (scalars, string, list) are handled directly; only
/// composite types need registration. Shared immutably (`Arc`) by
/// everything that streams values.
#[derive(Default)]
pub struct Registry {
    streamers: HashMap<i16, Arc<dyn Streamer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a composite codec. Registering a second codec under
    /// the same code is an error; codes are a fixed contract between
    /// the two ends of a connection.
    pub fn register(
        &mut self,
        streamer: Arc<dyn Streamer>,
    ) -> Result<(), ProtocolError> {
        let code = streamer.code();
        if self.streamers.contains_key(&code.0) {
            return Err(ProtocolError::DuplicateTypeCode(code));
        }
        tracing::debug!(%code, name = streamer.name(), "registered streamer");
        self.streamers.insert(code.0, streamer);
        Ok(())
    }

    /// Looks up the codec for a composite code.
    pub fn streamer(
        &self,
        code: TypeCode,
    ) -> Option<&Arc<dyn Streamer>> {
        self.streamers.get(&code.0)
    }

    fn require(
        &self,
        code: TypeCode,
    ) -> Result<&Arc<dyn Streamer>, ProtocolError> {
        self.streamer(code)
            .ok_or(ProtocolError::UnknownTypeCode(code))
    }

    // -- self-describing single values --------------------------------

    /// Writes a value as its type code followed by the payload.
    ///
    /// Writing a composite whose code has no registered codec is a
    /// fatal [`ProtocolError::UnknownTypeCode`].
    pub fn write_value(
        &self,
        w: &mut dyn StreamWriter,
        value: &Value,
    ) -> Result<(), ProtocolError> {
        w.write_short(value.type_code().0)?;
        self.write_payload(w, value)
    }

    /// Reads one self-describing value.
    pub fn read_value(
        &self,
        r: &mut dyn StreamReader,
    ) -> Result<Value, ProtocolError> {
        let code = TypeCode(r.read_short()?);
        self.read_payload(r, code)
    }

    // -- homogeneous lists ---------------------------------------------

    /// Writes an ordered list of same-typed values: a length, then,
    /// for a non-empty list, a single type header followed by the
    /// bare payloads.
    ///
    /// Mixed runtime types are a caller contract violation
    /// ([`ProtocolError::MixedValues`]); more than 32767 elements is
    /// [`ProtocolError::ListTooLong`].
    pub fn write_values(
        &self,
        w: &mut dyn StreamWriter,
        values: &[Value],
    ) -> Result<(), ProtocolError> {
        if values.len() > MAX_LIST_LEN {
            return Err(ProtocolError::ListTooLong(values.len()));
        }
        w.write_short(values.len() as i16)?;
        let Some(first) = values.first() else {
            return Ok(());
        };
        let code = first.type_code();
        if values.iter().any(|v| v.type_code() != code) {
            return Err(ProtocolError::MixedValues);
        }
        w.write_short(code.0)?;
        for value in values {
            self.write_payload(w, value)?;
        }
        Ok(())
    }

    /// Reads a homogeneous list written by [`write_values`](Self::write_values).
    pub fn read_values(
        &self,
        r: &mut dyn StreamReader,
    ) -> Result<Vec<Value>, ProtocolError> {
        let count = r.read_short()?;
        if count < 0 {
            return Err(ProtocolError::Decode(format!(
                "negative list length {count}"
            )));
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let code = TypeCode(r.read_short()?);
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(self.read_payload(r, code)?);
        }
        Ok(values)
    }

    // -- bare payloads ---------------------------------------------------

    fn write_payload(
        &self,
        w: &mut dyn StreamWriter,
        value: &Value,
    ) -> Result<(), ProtocolError> {
        match value {
            Value::Bool(v) => w.write_bool(*v),
            Value::Byte(v) => w.write_byte(*v),
            Value::Short(v) => w.write_short(*v),
            Value::Char(v) => w.write_char(*v),
            Value::Int(v) => w.write_int(*v),
            Value::Long(v) => w.write_long(*v),
            Value::Float(v) => w.write_float(*v),
            Value::Double(v) => w.write_double(*v),
            Value::String(v) => w.write_string(v.as_deref()),
            Value::List(items) => self.write_values(w, items),
            Value::Composite(code, fields) => {
                self.require(*code)?.encode(fields, w, self)
            }
        }
    }

    fn read_payload(
        &self,
        r: &mut dyn StreamReader,
        code: TypeCode,
    ) -> Result<Value, ProtocolError> {
        Ok(match code {
            TypeCode::BOOL => Value::Bool(r.read_bool()?),
            TypeCode::BYTE => Value::Byte(r.read_byte()?),
            TypeCode::SHORT => Value::Short(r.read_short()?),
            TypeCode::CHAR => Value::Char(r.read_char()?),
            TypeCode::INT => Value::Int(r.read_int()?),
            TypeCode::LONG => Value::Long(r.read_long()?),
            TypeCode::FLOAT => Value::Float(r.read_float()?),
            TypeCode::DOUBLE => Value::Double(r.read_double()?),
            TypeCode::STRING => Value::String(r.read_string()?),
            TypeCode::LIST => Value::List(self.read_values(r)?),
            code => {
                let fields = self.require(code)?.decode(r, self)?;
                Value::Composite(code, fields)
            }
        })
    }
}
