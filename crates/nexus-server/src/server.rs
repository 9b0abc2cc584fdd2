//! `NexusServer` builder and accept loop.
//!
//! Ties the layers together: a listener yields channels, each channel
//! gets a handler task, and every handler shares the same object
//! space, service dispatcher, and entity registry.

use std::sync::Arc;

use nexus_object::ServiceDispatcher;
use nexus_transport::{Listener, TcpListenerTransport};
use nexus_wire::Registry;
use tracing::{error, info};

use crate::handler::handle_channel;
use crate::manager::ObjectManager;
use crate::space::ObjectSpace;
use crate::ServerError;

/// Shared server state, one per server, cloned into each handler task.
pub(crate) struct ServerState {
    pub(crate) space: Arc<ObjectSpace>,
    pub(crate) services: ServiceDispatcher,
    pub(crate) entities: Arc<ObjectManager>,
    pub(crate) registry: Arc<Registry>,
}

/// Builder for configuring and starting a server.
///
/// ```rust,ignore
/// let server = NexusServer::builder()
///     .bind("0.0.0.0:4800")
///     .registry(registry)
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct NexusServerBuilder {
    bind_addr: String,
    registry: Arc<Registry>,
    services: ServiceDispatcher,
}

impl NexusServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:4800".to_string(),
            registry: Arc::new(Registry::new()),
            services: ServiceDispatcher::new(),
        }
    }

    /// Sets the address to bind to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the codec registry shared with clients.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Installs the service dispatcher.
    pub fn services(mut self, services: ServiceDispatcher) -> Self {
        self.services = services;
        self
    }

    /// Binds the listener and builds the server.
    pub async fn build(
        self,
    ) -> Result<NexusServer<TcpListenerTransport>, ServerError> {
        let listener = TcpListenerTransport::bind(&self.bind_addr).await?;
        Ok(self.with_listener(listener))
    }

    /// Builds the server around an already-bound listener; useful for
    /// non-default transports.
    pub fn with_listener<L: Listener>(self, listener: L) -> NexusServer<L> {
        let state = Arc::new(ServerState {
            space: Arc::new(ObjectSpace::new(self.registry.clone())),
            services: self.services,
            entities: Arc::new(ObjectManager::new()),
            registry: self.registry,
        });
        NexusServer { listener, state }
    }
}

impl Default for NexusServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running server.
pub struct NexusServer<L: Listener> {
    listener: L,
    state: Arc<ServerState>,
}

impl<L: Listener> NexusServer<L> {
    pub fn builder() -> NexusServerBuilder {
        NexusServerBuilder::new()
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// The table of hosted objects. Publish here before or while
    /// running.
    pub fn space(&self) -> &Arc<ObjectSpace> {
        &self.state.space
    }

    /// The entity registry backing server-side state.
    pub fn entities(&self) -> &Arc<ObjectManager> {
        &self.state.entities
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!(addr = ?self.local_addr().ok(), "server running");
        loop {
            match self.listener.accept().await {
                Ok(channel) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        handle_channel(channel, state).await;
                    });
                }
                Err(err) => {
                    error!(%err, "accept failed");
                }
            }
        }
    }
}
