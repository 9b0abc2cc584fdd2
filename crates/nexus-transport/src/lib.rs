//! Transport abstraction layer for Nexus.
//!
//! The connection layer only needs a byte-oriented duplex channel; this
//! crate provides that contract ([`Channel`], [`Transport`],
//! [`Listener`]) and two bindings:
//!
//! # Feature Flags
//!
//! - `tcp` (default): native TCP sockets via tokio
//! - `websocket` (default): WebSocket via `tokio-tungstenite`, for
//!   browser-bridge deployments

mod error;
#[cfg(feature = "tcp")]
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "tcp")]
pub use tcp::{TcpChannel, TcpListenerTransport, TcpTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WsChannel, WsListenerTransport, WsTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique channel IDs.
static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan-{}", self.0)
    }
}

/// A byte-oriented duplex channel to one remote peer.
///
/// Chunks returned by [`recv`](Self::recv) carry no framing guarantees:
/// a logical frame may arrive split across any number of chunks, and a
/// chunk may carry several frames. Reassembly is the wire layer's job.
///
/// The methods are declared with explicit `impl Future + Send` return
/// types so that generic channel loops can be handed to `tokio::spawn`;
/// implementations can still use plain `async fn`.
pub trait Channel: Send + Sync + 'static {
    /// Sends bytes to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next chunk of bytes.
    ///
    /// Returns `Ok(None)` when the channel is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the channel. Safe to call more than once.
    fn close(
        &self,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this channel.
    fn id(&self) -> ChannelId;
}

/// Opens outbound channels (the client side of a binding).
pub trait Transport: Send + Sync + 'static {
    /// The channel type produced by this transport.
    type Channel: Channel;

    /// Connects to `host` (a `host:port` string).
    fn connect(
        &self,
        host: &str,
    ) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;
}

/// Accepts inbound channels (the server side of a binding).
pub trait Listener: Send + 'static {
    /// The channel type produced by this listener.
    type Channel: Channel;

    /// Waits for and accepts the next incoming channel.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;

    /// Returns the local address the listener is bound to.
    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr>;
}
