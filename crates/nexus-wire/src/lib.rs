//! Wire protocol for Nexus.
//!
//! This crate defines everything that travels between a client and a
//! server, with no I/O of its own:
//!
//! - **Value model** ([`Value`], [`TypeCode`]): the self-describing
//!   typed values the protocol carries.
//! - **Registry** ([`Registry`], [`Streamer`]): the global code-to-codec
//!   table for registered composite types.
//! - **Stream traits** ([`StreamWriter`], [`StreamReader`]): the
//!   typed-primitive surface shared by the binary and text encodings.
//! - **Realizations** ([`BinWriter`]/[`BinReader`],
//!   [`TokenWriter`]/[`TokenReader`], [`ArrayWriter`]/[`ArrayReader`]).
//! - **Framing** ([`FrameReader`], [`frame`]): length-prefixed frames
//!   for byte-oriented channels.
//! - **Messages** ([`Upstream`], [`Downstream`], [`EventRecord`]):
//!   the logical message kinds.

mod binary;
mod error;
mod frame;
mod message;
mod registry;
mod stream;
mod text;
mod value;

pub use binary::{BinReader, BinWriter};
pub use error::ProtocolError;
pub use frame::{frame, FrameReader, HEADER_LEN, MAX_FRAME_SIZE};
pub use message::{
    AddressRec, Downstream, EventPayload, EventRecord, ObjectId,
    ObjectSnapshot, Upstream,
};
pub use registry::{FieldKind, Registry, SchemaStreamer, Streamer};
pub use stream::{StreamReader, StreamWriter};
pub use text::{
    ArrayReader, ArrayWriter, TokenReader, TokenWriter, TOKEN_SEPARATOR,
};
pub use value::{TypeCode, Value, MAX_LIST_LEN};
