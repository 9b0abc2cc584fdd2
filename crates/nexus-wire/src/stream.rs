//! The typed primitive read/write surface shared by every encoding.
//!
//! The wire layer has two realizations, the binary-framed form and the
//! text-token form, and both expose exactly this surface. Generic
//! value streaming ([`Registry`](crate::Registry)) and the message
//! codecs ([`Upstream`](crate::Upstream), [`Downstream`](crate::Downstream))
//! are written against `&mut dyn StreamWriter` / `&mut dyn StreamReader`,
//! so the same codec drives either encoding.

use crate::ProtocolError;

/// Writes typed primitives to an underlying encoding.
pub trait StreamWriter {
    fn write_bool(&mut self, v: bool) -> Result<(), ProtocolError>;
    fn write_byte(&mut self, v: i8) -> Result<(), ProtocolError>;
    fn write_short(&mut self, v: i16) -> Result<(), ProtocolError>;
    fn write_char(&mut self, v: char) -> Result<(), ProtocolError>;
    fn write_int(&mut self, v: i32) -> Result<(), ProtocolError>;
    fn write_long(&mut self, v: i64) -> Result<(), ProtocolError>;
    fn write_float(&mut self, v: f32) -> Result<(), ProtocolError>;
    fn write_double(&mut self, v: f64) -> Result<(), ProtocolError>;

    /// Writes a nullable string: a presence flag, then the bytes when
    /// present.
    fn write_string(&mut self, v: Option<&str>) -> Result<(), ProtocolError>;
}

/// Reads typed primitives from an underlying encoding.
///
/// Readers are strict: a value of the wrong shape or an exhausted
/// input is a [`ProtocolError`], never a silent default.
pub trait StreamReader {
    fn read_bool(&mut self) -> Result<bool, ProtocolError>;
    fn read_byte(&mut self) -> Result<i8, ProtocolError>;
    fn read_short(&mut self) -> Result<i16, ProtocolError>;
    fn read_char(&mut self) -> Result<char, ProtocolError>;
    fn read_int(&mut self) -> Result<i32, ProtocolError>;
    fn read_long(&mut self) -> Result<i64, ProtocolError>;
    fn read_float(&mut self) -> Result<f32, ProtocolError>;
    fn read_double(&mut self) -> Result<f64, ProtocolError>;
    fn read_string(&mut self) -> Result<Option<String>, ProtocolError>;
}
