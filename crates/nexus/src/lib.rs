//! # Nexus
//!
//! Runtime for distributed shared objects.
//!
//! A client holds typed proxies of server-resident objects. Object
//! attributes (values, maps, service endpoints) stay synchronized
//! through a stream of mutation events over one framed connection per
//! host, and service calls ride the same channel.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use nexus::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Scoreboard {
//!     round: DValue<i32>,
//!     scores: DMap<String, i32>,
//! }
//!
//! impl NexusObject for Scoreboard {
//!     fn visit_attributes(&mut self, visit: &mut dyn FnMut(&mut dyn DAttribute)) {
//!         visit(&mut self.round);
//!         visit(&mut self.scores);
//!     }
//! }
//!
//! # async fn run() -> Result<(), NexusError> {
//! // Server: publish an object and run the accept loop.
//! let server = NexusServer::<TcpListenerTransport>::builder()
//!     .bind("0.0.0.0:4800")
//!     .build()
//!     .await?;
//! let (id, _board) = server.space().publish(Scoreboard::default());
//! tokio::spawn(server.run());
//!
//! // Client: one shared connection per host, typed subscription.
//! let sessions = Arc::new(SessionManager::new(
//!     TcpTransport,
//!     Arc::new(Registry::new()),
//! ));
//! let connection = sessions.with_connection("game.example:4800").await?;
//! let handle = connection
//!     .subscribe(&Address::<Scoreboard>::new("game.example:4800", id))
//!     .await?;
//! handle.with(|board| board.round.get());
//! # Ok(()) }
//! ```

mod error;

pub use error::NexusError;

/// Everything most applications need, one `use` away.
pub mod prelude {
    pub use crate::NexusError;
    pub use nexus_client::{
        ClientConfig, Connection, DisconnectPolicy, ObjectHandle,
        SessionManager,
    };
    pub use nexus_object::{
        Address, DAttribute, DMap, DService, DValue, Datum, Dispatcher,
        InlineDispatcher, NexusObject, ServiceDispatcher,
    };
    pub use nexus_server::{
        Entity, NexusServer, ObjectManager, ObjectSpace,
    };
    pub use nexus_transport::{
        TcpListenerTransport, TcpTransport, Transport,
    };
    pub use nexus_wire::{
        FieldKind, ObjectId, Registry, SchemaStreamer, TypeCode, Value,
    };
}

/// Installs a default `tracing` subscriber honoring `RUST_LOG`. Call
/// once at startup; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
