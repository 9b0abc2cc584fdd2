//! The text realizations of the stream traits, for constrained
//! transports that cannot carry binary frames.
//!
//! The two directions are deliberately asymmetric and must never be
//! assumed symmetric:
//!
//! - **Client→server** ([`TokenWriter`]/[`TokenReader`]): each scalar
//!   is a token followed by a `'|'` separator. Bools are `1`/`0`,
//!   numbers their decimal form, longs base64 of the eight big-endian
//!   bytes, strings a presence token followed by the raw token.
//! - **Server→client** ([`ArrayWriter`]/[`ArrayReader`]): the message
//!   is one array literal `[v1,v2,...,vn]`: strings double-quoted,
//!   absent strings `null`, longs single-quoted base64, everything
//!   else a decimal literal, so a constrained client can decode it
//!   with a generic array-literal evaluator. Ours is built on
//!   `serde_json` after normalizing the single-quoted tokens.
//!
//! Known limitation, preserved on purpose: the token form does not
//! escape the separator, so a string value containing `'|'` corrupts
//! the stream. Callers on this path must keep separator characters out
//! of string values.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::stream::{StreamReader, StreamWriter};
use crate::ProtocolError;

/// The token separator of the client→server form.
pub const TOKEN_SEPARATOR: char = '|';

fn encode_long(v: i64) -> String {
    BASE64.encode(v.to_be_bytes())
}

fn decode_long(token: &str) -> Result<i64, ProtocolError> {
    let bytes = BASE64
        .decode(token)
        .map_err(|e| ProtocolError::Decode(format!("bad long token: {e}")))?;
    let array: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
        ProtocolError::Decode(format!(
            "long token decodes to {} bytes, expected 8",
            bytes.len()
        ))
    })?;
    Ok(i64::from_be_bytes(array))
}

fn decode_char(raw: u32) -> Result<char, ProtocolError> {
    char::from_u32(raw).ok_or_else(|| {
        ProtocolError::Decode(format!("invalid char scalar {raw:#x}"))
    })
}

// ---------------------------------------------------------------------------
// TokenWriter / TokenReader (client→server)
// ---------------------------------------------------------------------------

/// Writes the separator-token form.
#[derive(Default)]
pub struct TokenWriter {
    buf: String,
}

impl TokenWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&mut self, token: impl AsRef<str>) {
        self.buf.push_str(token.as_ref());
        self.buf.push(TOKEN_SEPARATOR);
    }

    /// Consumes the writer and returns the token text.
    pub fn into_text(self) -> String {
        self.buf
    }
}

impl StreamWriter for TokenWriter {
    fn write_bool(&mut self, v: bool) -> Result<(), ProtocolError> {
        self.token(if v { "1" } else { "0" });
        Ok(())
    }

    fn write_byte(&mut self, v: i8) -> Result<(), ProtocolError> {
        self.token(v.to_string());
        Ok(())
    }

    fn write_short(&mut self, v: i16) -> Result<(), ProtocolError> {
        self.token(v.to_string());
        Ok(())
    }

    fn write_char(&mut self, v: char) -> Result<(), ProtocolError> {
        self.token((v as u32).to_string());
        Ok(())
    }

    fn write_int(&mut self, v: i32) -> Result<(), ProtocolError> {
        self.token(v.to_string());
        Ok(())
    }

    fn write_long(&mut self, v: i64) -> Result<(), ProtocolError> {
        self.token(encode_long(v));
        Ok(())
    }

    fn write_float(&mut self, v: f32) -> Result<(), ProtocolError> {
        self.token(v.to_string());
        Ok(())
    }

    fn write_double(&mut self, v: f64) -> Result<(), ProtocolError> {
        self.token(v.to_string());
        Ok(())
    }

    fn write_string(
        &mut self,
        v: Option<&str>,
    ) -> Result<(), ProtocolError> {
        match v {
            None => self.write_bool(false),
            Some(s) => {
                // The raw token is not escaped; see the module doc.
                self.write_bool(true)?;
                self.token(s);
                Ok(())
            }
        }
    }
}

/// Reads the separator-token form (the server side of the pair).
pub struct TokenReader<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> TokenReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn next_token(&mut self) -> Result<&'a str, ProtocolError> {
        if self.pos >= self.text.len() {
            return Err(ProtocolError::Eof);
        }
        let rest = &self.text[self.pos..];
        let end = rest.find(TOKEN_SEPARATOR).ok_or_else(|| {
            ProtocolError::Decode("unterminated token".into())
        })?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    fn parse<T: std::str::FromStr>(
        &mut self,
        what: &str,
    ) -> Result<T, ProtocolError> {
        let token = self.next_token()?;
        token.parse().map_err(|_| {
            ProtocolError::Decode(format!("bad {what} token {token:?}"))
        })
    }
}

impl StreamReader for TokenReader<'_> {
    fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.next_token()? {
            "1" => Ok(true),
            "0" => Ok(false),
            token => Err(ProtocolError::Decode(format!(
                "bad bool token {token:?}"
            ))),
        }
    }

    fn read_byte(&mut self) -> Result<i8, ProtocolError> {
        self.parse("byte")
    }

    fn read_short(&mut self) -> Result<i16, ProtocolError> {
        self.parse("short")
    }

    fn read_char(&mut self) -> Result<char, ProtocolError> {
        decode_char(self.parse("char")?)
    }

    fn read_int(&mut self) -> Result<i32, ProtocolError> {
        self.parse("int")
    }

    fn read_long(&mut self) -> Result<i64, ProtocolError> {
        let token = self.next_token()?;
        decode_long(token)
    }

    fn read_float(&mut self) -> Result<f32, ProtocolError> {
        self.parse("float")
    }

    fn read_double(&mut self) -> Result<f64, ProtocolError> {
        self.parse("double")
    }

    fn read_string(&mut self) -> Result<Option<String>, ProtocolError> {
        if !self.read_bool()? {
            return Ok(None);
        }
        Ok(Some(self.next_token()?.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// ArrayWriter / ArrayReader (server→client)
// ---------------------------------------------------------------------------

/// Writes the array-literal form.
#[derive(Default)]
pub struct ArrayWriter {
    items: Vec<String>,
}

impl ArrayWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the writer and returns the `[…]` literal.
    pub fn into_text(self) -> String {
        let mut out = String::from("[");
        out.push_str(&self.items.join(","));
        out.push(']');
        out
    }
}

impl StreamWriter for ArrayWriter {
    fn write_bool(&mut self, v: bool) -> Result<(), ProtocolError> {
        self.items.push(if v { "1" } else { "0" }.into());
        Ok(())
    }

    fn write_byte(&mut self, v: i8) -> Result<(), ProtocolError> {
        self.items.push(v.to_string());
        Ok(())
    }

    fn write_short(&mut self, v: i16) -> Result<(), ProtocolError> {
        self.items.push(v.to_string());
        Ok(())
    }

    fn write_char(&mut self, v: char) -> Result<(), ProtocolError> {
        self.items.push((v as u32).to_string());
        Ok(())
    }

    fn write_int(&mut self, v: i32) -> Result<(), ProtocolError> {
        self.items.push(v.to_string());
        Ok(())
    }

    fn write_long(&mut self, v: i64) -> Result<(), ProtocolError> {
        self.items.push(format!("'{}'", encode_long(v)));
        Ok(())
    }

    fn write_float(&mut self, v: f32) -> Result<(), ProtocolError> {
        self.items.push(v.to_string());
        Ok(())
    }

    fn write_double(&mut self, v: f64) -> Result<(), ProtocolError> {
        self.items.push(v.to_string());
        Ok(())
    }

    fn write_string(
        &mut self,
        v: Option<&str>,
    ) -> Result<(), ProtocolError> {
        match v {
            None => self.items.push("null".into()),
            Some(s) => {
                // serde_json produces the double-quoted, escaped form.
                let quoted = serde_json::to_string(s)
                    .map_err(|e| ProtocolError::Decode(e.to_string()))?;
                self.items.push(quoted);
            }
        }
        Ok(())
    }
}

/// The generic array-literal evaluator: decodes the `[…]` form by
/// normalizing single-quoted tokens to JSON strings, parsing with
/// `serde_json`, and coercing elements as each typed read demands.
pub struct ArrayReader {
    items: Vec<serde_json::Value>,
    pos: usize,
}

impl ArrayReader {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let normalized = normalize_quotes(text);
        let parsed: serde_json::Value = serde_json::from_str(&normalized)
            .map_err(|e| {
                ProtocolError::Decode(format!("bad array literal: {e}"))
            })?;
        let serde_json::Value::Array(items) = parsed else {
            return Err(ProtocolError::Decode(
                "expected an array literal".into(),
            ));
        };
        Ok(Self { items, pos: 0 })
    }

    fn next(&mut self) -> Result<&serde_json::Value, ProtocolError> {
        let item = self.items.get(self.pos).ok_or(ProtocolError::Eof)?;
        self.pos += 1;
        Ok(item)
    }

    fn next_i64(&mut self, what: &str) -> Result<i64, ProtocolError> {
        let item = self.next()?;
        item.as_i64().ok_or_else(|| {
            ProtocolError::Decode(format!("bad {what} element {item}"))
        })
    }

    fn next_f64(&mut self, what: &str) -> Result<f64, ProtocolError> {
        let item = self.next()?;
        item.as_f64().ok_or_else(|| {
            ProtocolError::Decode(format!("bad {what} element {item}"))
        })
    }
}

/// Rewrites single-quoted tokens to double-quoted JSON strings. The
/// single-quoted payloads are base64, whose alphabet contains neither
/// quote character nor a backslash, so a quote-state scan suffices.
fn normalize_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        match c {
            '\\' if in_string && !escaped => {
                escaped = true;
                out.push(c);
                continue;
            }
            '"' if !escaped => in_string = !in_string,
            '\'' if !in_string => {
                out.push('"');
                escaped = false;
                continue;
            }
            _ => {}
        }
        escaped = false;
        out.push(c);
    }
    out
}

impl StreamReader for ArrayReader {
    fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.next_i64("bool")? {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(ProtocolError::Decode(format!(
                "bad bool element {n}"
            ))),
        }
    }

    fn read_byte(&mut self) -> Result<i8, ProtocolError> {
        let n = self.next_i64("byte")?;
        i8::try_from(n)
            .map_err(|_| ProtocolError::Decode(format!("byte out of range: {n}")))
    }

    fn read_short(&mut self) -> Result<i16, ProtocolError> {
        let n = self.next_i64("short")?;
        i16::try_from(n)
            .map_err(|_| ProtocolError::Decode(format!("short out of range: {n}")))
    }

    fn read_char(&mut self) -> Result<char, ProtocolError> {
        let n = self.next_i64("char")?;
        let raw = u32::try_from(n)
            .map_err(|_| ProtocolError::Decode(format!("char out of range: {n}")))?;
        decode_char(raw)
    }

    fn read_int(&mut self) -> Result<i32, ProtocolError> {
        let n = self.next_i64("int")?;
        i32::try_from(n)
            .map_err(|_| ProtocolError::Decode(format!("int out of range: {n}")))
    }

    fn read_long(&mut self) -> Result<i64, ProtocolError> {
        let item = self.next()?;
        let token = item.as_str().ok_or_else(|| {
            ProtocolError::Decode(format!("bad long element {item}"))
        })?;
        decode_long(token)
    }

    fn read_float(&mut self) -> Result<f32, ProtocolError> {
        Ok(self.next_f64("float")? as f32)
    }

    fn read_double(&mut self) -> Result<f64, ProtocolError> {
        self.next_f64("double")
    }

    fn read_string(&mut self) -> Result<Option<String>, ProtocolError> {
        let item = self.next()?;
        match item {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(s) => Ok(Some(s.clone())),
            other => Err(ProtocolError::Decode(format!(
                "bad string element {other}"
            ))),
        }
    }
}
