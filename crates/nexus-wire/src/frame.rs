//! Length-prefixed framing for byte-oriented channels.
//!
//! A frame is a 4-byte big-endian payload length followed by that many
//! payload bytes. The reader buffers partial input across calls, so it
//! does not care how the transport splits the bytes: a frame header
//! can arrive one byte at a time.

use bytes::{Buf, Bytes, BytesMut};

use crate::ProtocolError;

/// Size of the frame length header.
pub const HEADER_LEN: usize = 4;

/// Hard cap on a single frame (header + payload). Exceeding it is a
/// fatal stream error, never a silent truncation.
pub const MAX_FRAME_SIZE: usize = 512 * 1024;

/// Prefixes a payload with its length header.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let total = HEADER_LEN + payload.len();
    if total > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: total,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Reassembles frames from arbitrarily split byte chunks.
///
/// [`feed`](Self::feed) appends incoming bytes; [`next_frame`](Self::next_frame)
/// yields complete payloads in arrival order. The internal buffer grows
/// by amortized doubling and is compacted each time a frame is consumed
/// (`split_to` hands the consumed prefix back to the pool).
#[derive(Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of raw bytes from the transport.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.reserve(chunk.len());
        self.buf.extend_from_slice(chunk);
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete frame payload, or `None` if more
    /// bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes(
            self.buf[..HEADER_LEN].try_into().expect("4-byte header"),
        ) as usize;
        let total = HEADER_LEN + len;
        if total > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            });
        }
        if self.buf.len() < total {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}
