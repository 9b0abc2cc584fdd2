//! The session manager: one connection per host, no matter how many
//! tasks ask for it.
//!
//! # Concurrency note
//!
//! A single mutex guards both the live-connection table and the
//! pending-attempt table, so the decision "reuse, wait, or open" is
//! atomic. The lock is never held across an await: the task that wins
//! the race releases it and spawns one dial task, which re-locks to
//! publish the outcome to everyone who queued, the winner included.
//! All concurrent requests for one host therefore share a single
//! connect attempt and a single outcome, and cancelling any caller
//! cannot orphan the attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nexus_object::{Dispatcher, InlineDispatcher};
use nexus_transport::Transport;
use nexus_wire::Registry;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::config::{ClientConfig, DisconnectPolicy};
use crate::connection::Connection;
use crate::ClientError;

type Waiter = oneshot::Sender<Result<Arc<Connection>, String>>;

#[derive(Default)]
struct Roster {
    /// Connections currently usable, keyed by host.
    live: HashMap<String, Arc<Connection>>,
    /// Hosts with a dial in flight, and who is waiting on it.
    pending: HashMap<String, Vec<Waiter>>,
}

/// Hands out shared connections, deduplicating concurrent requests for
/// the same host.
pub struct SessionManager<T: Transport> {
    transport: T,
    registry: Arc<Registry>,
    config: ClientConfig,
    dispatcher: Arc<dyn Dispatcher>,
    roster: Mutex<Roster>,
}

enum Claim {
    /// An existing connection was reused.
    Reuse(Arc<Connection>),
    /// Another task is dialing; wait for its outcome.
    Wait(oneshot::Receiver<Result<Arc<Connection>, String>>),
    /// This task won the race; a dial must be spawned, and this
    /// receiver gets its outcome along with everyone else's.
    Dial(oneshot::Receiver<Result<Arc<Connection>, String>>),
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T, registry: Arc<Registry>) -> Self {
        Self::with_config(transport, registry, ClientConfig::default())
    }

    pub fn with_config(
        transport: T,
        registry: Arc<Registry>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
            dispatcher: Arc::new(InlineDispatcher),
            roster: Mutex::new(Roster::default()),
        }
    }

    /// Replaces the dispatcher that listener callbacks run through on
    /// connections opened after this call.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the connection to `host`, opening one if needed.
    ///
    /// When several tasks ask for the same unconnected host at once,
    /// exactly one dial happens and every caller gets the same result,
    /// success or failure.
    pub async fn with_connection(
        self: &Arc<Self>,
        host: &str,
    ) -> Result<Arc<Connection>, ClientError> {
        match self.claim(host) {
            Claim::Reuse(connection) => {
                connection.touch();
                Ok(connection)
            }
            Claim::Wait(rx) => Self::await_outcome(rx).await,
            Claim::Dial(rx) => {
                // The dial runs in its own task so that cancelling
                // this caller cannot strand the waiters queued on the
                // pending entry.
                let manager = self.clone();
                let host = host.to_owned();
                tokio::spawn(async move {
                    let outcome = manager.dial(&host).await;
                    manager.publish(&host, &outcome);
                });
                Self::await_outcome(rx).await
            }
        }
    }

    /// Releases a use of the host's connection. The disconnect policy
    /// applies only while the connection has no live subscriptions.
    pub fn release(self: &Arc<Self>, host: &str) {
        let connection = {
            let roster = self.roster.lock().unwrap();
            match roster.live.get(host) {
                Some(connection) => connection.clone(),
                None => return,
            }
        };
        let subs = connection.subscription_count();
        if subs > 0 {
            debug!(%host, subs, "connection still subscribed, keeping");
            return;
        }
        match self.config.disconnect_policy {
            DisconnectPolicy::Never => {}
            DisconnectPolicy::Immediate => self.drop_connection(host),
            DisconnectPolicy::Debounced { .. } => {
                let linger = self
                    .config
                    .disconnect_policy
                    .linger()
                    .unwrap_or(Duration::ZERO);
                self.linger_then_drop(host.to_owned(), linger);
            }
        }
    }

    /// The number of live connections.
    pub fn connection_count(&self) -> usize {
        self.roster.lock().unwrap().live.len()
    }

    async fn await_outcome(
        rx: oneshot::Receiver<Result<Arc<Connection>, String>>,
    ) -> Result<Arc<Connection>, ClientError> {
        match rx.await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(reason)) => Err(ClientError::ConnectFailed(reason)),
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }

    fn claim(&self, host: &str) -> Claim {
        let mut roster = self.roster.lock().unwrap();
        if let Some(connection) = roster.live.get(host) {
            if !connection.is_closed() {
                return Claim::Reuse(connection.clone());
            }
            roster.live.remove(host);
        }
        if let Some(waiters) = roster.pending.get_mut(host) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Claim::Wait(rx);
        }
        let (tx, rx) = oneshot::channel();
        roster.pending.insert(host.to_owned(), vec![tx]);
        Claim::Dial(rx)
    }

    async fn dial(&self, host: &str) -> Result<Arc<Connection>, ClientError> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        info!(%host, "connecting");
        let channel =
            match tokio::time::timeout(timeout, self.transport.connect(host))
                .await
            {
                Ok(Ok(channel)) => channel,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    return Err(ClientError::ConnectTimeout {
                        host: host.to_owned(),
                        secs: self.config.connect_timeout_secs,
                    })
                }
            };
        Ok(Connection::start(
            host.to_owned(),
            channel,
            self.registry.clone(),
            self.dispatcher.clone(),
        ))
    }

    /// Publishes a dial outcome: installs the connection on success
    /// and wakes every queued waiter either way. Waiters are notified
    /// after the lock is released.
    fn publish(
        self: &Arc<Self>,
        host: &str,
        outcome: &Result<Arc<Connection>, ClientError>,
    ) {
        if let Ok(connection) = outcome {
            let manager = Arc::downgrade(self);
            let idle_host = host.to_owned();
            connection.set_idle_hook(move || {
                if let Some(manager) = manager.upgrade() {
                    manager.release(&idle_host);
                }
            });
        }
        let waiters = {
            let mut roster = self.roster.lock().unwrap();
            if let Ok(connection) = outcome {
                roster.live.insert(host.to_owned(), connection.clone());
            }
            match roster.pending.remove(host) {
                Some(waiters) => waiters,
                None => {
                    error!(%host, "dial finished with no pending entry");
                    Vec::new()
                }
            }
        };
        for waiter in waiters {
            let message = match outcome {
                Ok(connection) => Ok(connection.clone()),
                Err(err) => Err(err.to_string()),
            };
            let _ = waiter.send(message);
        }
    }

    fn drop_connection(&self, host: &str) {
        let connection = self.roster.lock().unwrap().live.remove(host);
        if let Some(connection) = connection {
            debug!(%host, "releasing connection");
            connection.shutdown();
        }
    }

    fn linger_then_drop(self: &Arc<Self>, host: String, linger: Duration) {
        let manager = self.clone();
        let epoch = {
            let roster = manager.roster.lock().unwrap();
            match roster.live.get(&host) {
                Some(connection) => connection.current_epoch(),
                None => return,
            }
        };
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            let stale = {
                let mut roster = manager.roster.lock().unwrap();
                match roster.live.get(&host) {
                    Some(connection)
                        if connection.current_epoch() == epoch
                            && connection.subscription_count() == 0 =>
                    {
                        roster.live.remove(&host)
                    }
                    _ => None,
                }
            };
            if let Some(connection) = stale {
                debug!(%host, "linger elapsed, releasing connection");
                connection.shutdown();
            }
        });
    }
}
