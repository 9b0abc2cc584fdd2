//! Error types for the wire layer.

use crate::value::TypeCode;

/// Errors that can occur while encoding, decoding, or framing.
///
/// Every variant here is fatal to the affected stream or message:
/// the connection that produced it must be closed rather than left
/// running in an unknown state.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A single frame exceeded the hard buffer cap.
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A type code with no registered codec was written or read.
    #[error("no codec registered for type code {0}")]
    UnknownTypeCode(TypeCode),

    /// Two codecs were registered under the same type code.
    #[error("type code {0} is already registered")]
    DuplicateTypeCode(TypeCode),

    /// `write_values` was called with elements of more than one
    /// runtime type. This is a caller contract violation.
    #[error("values in a homogeneous list have mixed types")]
    MixedValues,

    /// A list exceeded the 32767-element cap.
    #[error("list of {0} elements exceeds the 32767-element cap")]
    ListTooLong(usize),

    /// An enum tag on the wire did not match any known variant.
    #[error("unknown {what} tag {tag}")]
    UnknownTag { what: &'static str, tag: i16 },

    /// The payload bytes could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The input ended before a complete value was read.
    #[error("unexpected end of input")]
    Eof,
}
