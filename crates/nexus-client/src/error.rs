//! Error types for the client runtime.

use thiserror::Error;

/// Errors produced while connecting to hosts and working with remote
/// objects.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying channel failed.
    #[error(transparent)]
    Transport(#[from] nexus_transport::TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] nexus_wire::ProtocolError),

    /// A proxy object rejected incoming state.
    #[error(transparent)]
    Object(#[from] nexus_object::ObjectError),

    /// The server refused a subscribe request.
    #[error("subscribe rejected: {0}")]
    SubscribeFailed(String),

    /// A dial this caller was waiting on failed. Carries the winning
    /// attempt's error as text.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Connecting to a host did not finish within the configured
    /// timeout.
    #[error("connecting to {host} timed out after {secs}s")]
    ConnectTimeout { host: String, secs: u64 },

    /// The connection went away while a request was in flight.
    #[error("connection closed")]
    ConnectionClosed,
}
