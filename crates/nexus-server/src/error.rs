//! Error types for the server runtime.

use thiserror::Error;

/// Errors from the server accept loop and connection handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener or a channel failed.
    #[error(transparent)]
    Transport(#[from] nexus_transport::TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] nexus_wire::ProtocolError),

    /// A hosted object rejected an operation.
    #[error(transparent)]
    Object(#[from] nexus_object::ObjectError),

    /// An entity lookup failed.
    #[error(transparent)]
    Entity(#[from] EntityError),
}

/// Errors from the entity registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityError {
    /// No singleton of this type is registered.
    #[error("no singleton entity of type {0}")]
    UnknownSingleton(&'static str),

    /// No entity of this type is registered under this key.
    #[error("no entity of type {type_name} under key {key}")]
    UnknownKeyed { type_name: &'static str, key: i64 },

    /// The entity's task is gone; it was removed while callers still
    /// held the registry.
    #[error("entity mailbox closed")]
    MailboxClosed,
}
