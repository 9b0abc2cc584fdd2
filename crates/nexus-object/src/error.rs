//! Error types for the distributed object model.

use nexus_wire::{ObjectId, TypeCode};

/// Errors raised while building, mutating, or applying events to a
/// distributed object.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    /// An event targeted an attribute index the object does not have.
    /// This is version skew or a programming error and is fatal for
    /// the message that carried it.
    #[error("object {object} has no attribute {index} (count {count})")]
    NoSuchAttribute {
        object: ObjectId,
        index: u16,
        count: usize,
    },

    /// A value did not match the attribute's declared kind.
    #[error("expected {expected}, found {found}")]
    WrongKind {
        expected: &'static str,
        found: String,
    },

    /// The event payload kind cannot apply to this attribute.
    #[error("event payload not applicable to {0} attribute")]
    NotApplicable(&'static str),

    /// A service attribute was invoked before a transport caller was
    /// attached to it.
    #[error("service {service} on object {object} has no caller attached")]
    ServiceUnbound {
        object: ObjectId,
        service: TypeCode,
    },

    /// A snapshot did not have the shape this attribute expects.
    #[error("bad snapshot: {0}")]
    BadSnapshot(String),
}
