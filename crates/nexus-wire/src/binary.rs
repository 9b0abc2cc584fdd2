//! The binary realization of the stream traits.
//!
//! Big-endian throughout. Scalars are fixed-width; strings are a
//! presence flag followed by a u32 length and UTF-8 bytes. Chars are
//! carried as their Unicode scalar value in four bytes and validated
//! on decode.

use crate::stream::{StreamReader, StreamWriter};
use crate::ProtocolError;

// ---------------------------------------------------------------------------
// BinWriter
// ---------------------------------------------------------------------------

/// Accumulates the binary encoding into an owned buffer.
#[derive(Default)]
pub struct BinWriter {
    buf: Vec<u8>,
}

impl BinWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the writer and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl StreamWriter for BinWriter {
    fn write_bool(&mut self, v: bool) -> Result<(), ProtocolError> {
        self.buf.push(v as u8);
        Ok(())
    }

    fn write_byte(&mut self, v: i8) -> Result<(), ProtocolError> {
        self.buf.push(v as u8);
        Ok(())
    }

    fn write_short(&mut self, v: i16) -> Result<(), ProtocolError> {
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    fn write_char(&mut self, v: char) -> Result<(), ProtocolError> {
        self.buf.extend_from_slice(&(v as u32).to_be_bytes());
        Ok(())
    }

    fn write_int(&mut self, v: i32) -> Result<(), ProtocolError> {
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    fn write_long(&mut self, v: i64) -> Result<(), ProtocolError> {
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    fn write_float(&mut self, v: f32) -> Result<(), ProtocolError> {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
        Ok(())
    }

    fn write_double(&mut self, v: f64) -> Result<(), ProtocolError> {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
        Ok(())
    }

    fn write_string(
        &mut self,
        v: Option<&str>,
    ) -> Result<(), ProtocolError> {
        match v {
            None => self.write_bool(false),
            Some(s) => {
                self.write_bool(true)?;
                self.buf
                    .extend_from_slice(&(s.len() as u32).to_be_bytes());
                self.buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BinReader
// ---------------------------------------------------------------------------

/// A cursor over a binary-encoded payload.
pub struct BinReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BinReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() - self.pos < n {
            return Err(ProtocolError::Eof);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(
        &mut self,
    ) -> Result<[u8; N], ProtocolError> {
        let slice = self.take(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }
}

impl StreamReader for BinReader<'_> {
    fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(ProtocolError::Decode(format!(
                "invalid bool byte {b:#04x}"
            ))),
        }
    }

    fn read_byte(&mut self) -> Result<i8, ProtocolError> {
        Ok(self.take(1)?[0] as i8)
    }

    fn read_short(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    fn read_char(&mut self) -> Result<char, ProtocolError> {
        let raw = u32::from_be_bytes(self.take_array()?);
        char::from_u32(raw).ok_or_else(|| {
            ProtocolError::Decode(format!("invalid char scalar {raw:#x}"))
        })
    }

    fn read_int(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    fn read_long(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    fn read_float(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_bits(u32::from_be_bytes(self.take_array()?)))
    }

    fn read_double(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take_array()?)))
    }

    fn read_string(&mut self) -> Result<Option<String>, ProtocolError> {
        if !self.read_bool()? {
            return Ok(None);
        }
        let len = u32::from_be_bytes(self.take_array()?) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
