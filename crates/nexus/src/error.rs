//! Unified error type for the Nexus runtime.

use nexus_client::ClientError;
use nexus_object::ObjectError;
use nexus_server::{EntityError, ServerError};
use nexus_transport::TransportError;
use nexus_wire::ProtocolError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `nexus` meta-crate, you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so the `?`
/// operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    /// A wire-format error (encode, decode, framing).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A transport-level error (connect, send, recv, accept).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An object-model error (bad snapshot, wrong value kind).
    #[error(transparent)]
    Object(#[from] ObjectError),

    /// A client-runtime error (dial, subscribe, connection loss).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// An entity-registry error (unknown singleton or key).
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// A server-runtime error.
    #[error(transparent)]
    Server(#[from] ServerError),
}
