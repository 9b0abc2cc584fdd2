//! One live connection to a remote host.
//!
//! A connection owns two tasks: a read loop that reassembles frames,
//! decodes downstream messages and routes them, and a write loop that
//! drains an outbound queue into the channel. Everything else here is
//! bookkeeping: request ids and the tables of callers waiting for
//! responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use nexus_object::{
    init_attributes, restore, Address, CallOutcome, Dispatcher, NexusObject,
    PassiveSink, ProxyTable, ServiceCaller,
};
use nexus_transport::Channel;
use nexus_wire::{
    frame, BinReader, BinWriter, Downstream, FrameReader, ObjectId,
    ObjectSnapshot, Registry, TypeCode, Upstream, Value,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::ClientError;

/// What the write loop pulls off the outbound queue.
enum Outbound {
    Frame(Vec<u8>),
    Shutdown,
}

type SubWaiter = oneshot::Sender<Result<ObjectSnapshot, String>>;
type CallWaiter = oneshot::Sender<CallOutcome>;

/// A live connection to one host, shared by every subscriber of that
/// host's objects.
pub struct Connection {
    host: String,
    registry: Arc<Registry>,
    proxies: Arc<ProxyTable>,
    dispatcher: Arc<dyn Dispatcher>,
    outbound: mpsc::UnboundedSender<Outbound>,
    next_req: AtomicU32,
    next_call: AtomicU32,
    pending_subs: Mutex<HashMap<u32, SubWaiter>>,
    pending_calls: Mutex<HashMap<u32, CallWaiter>>,
    closed: AtomicBool,
    /// Bumped on every use; the session layer's linger timer compares
    /// epochs to detect reuse.
    use_epoch: AtomicU64,
    /// Installed by the session layer; invoked when the last
    /// subscription ends so the disconnect policy can run.
    on_idle: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl Connection {
    /// Wires a freshly opened channel into a running connection,
    /// spawning its read and write loops. Listener callbacks for
    /// arriving events run through `dispatcher`.
    pub fn start<C: Channel>(
        host: String,
        channel: C,
        registry: Arc<Registry>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            host,
            registry,
            proxies: Arc::new(ProxyTable::new()),
            dispatcher,
            outbound: outbound_tx,
            next_req: AtomicU32::new(1),
            next_call: AtomicU32::new(1),
            pending_subs: Mutex::new(HashMap::new()),
            pending_calls: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            use_epoch: AtomicU64::new(0),
            on_idle: Mutex::new(None),
        });

        let channel = Arc::new(channel);
        tokio::spawn(write_loop(channel.clone(), outbound_rx));
        tokio::spawn(read_loop(channel, connection.clone()));

        connection
    }

    /// The `host:port` this connection is bound to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// `true` once the channel has gone away, cleanly or otherwise.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self) -> u64 {
        self.use_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn current_epoch(&self) -> u64 {
        self.use_epoch.load(Ordering::Acquire)
    }

    /// The number of live subscriptions on this connection.
    pub fn subscription_count(&self) -> usize {
        self.proxies.len()
    }

    pub(crate) fn set_idle_hook(
        &self,
        hook: impl Fn() + Send + Sync + 'static,
    ) {
        *self.on_idle.lock().unwrap() = Some(Box::new(hook));
    }

    /// Subscribes to a remote object and builds its local proxy.
    ///
    /// The returned handle shares state with the connection's proxy
    /// table: every event the server sends for this object mutates the
    /// proxy and fires its listeners.
    pub async fn subscribe<O>(
        self: &Arc<Self>,
        addr: &Address<O>,
    ) -> Result<ObjectHandle<O>, ClientError>
    where
        O: NexusObject + Default,
    {
        let req_id = self.next_req.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_subs.lock().unwrap().insert(req_id, tx);

        let message = Upstream::Subscribe {
            req_id,
            addr: addr.rec().clone(),
        };
        if let Err(err) = self.send_upstream(&message) {
            self.pending_subs.lock().unwrap().remove(&req_id);
            return Err(err);
        }

        let snapshot = match rx.await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(reason)) => {
                return Err(ClientError::SubscribeFailed(reason))
            }
            Err(_) => return Err(ClientError::ConnectionClosed),
        };

        let id = snapshot.id;
        let mut object = O::default();
        init_attributes(&mut object, id, Arc::new(PassiveSink::new()));
        restore(&mut object, snapshot)?;
        let caller: Arc<dyn ServiceCaller> = self.clone();
        object.visit_attributes(&mut |attr| attr.attach_caller(caller.clone()));

        let object = Arc::new(Mutex::new(object));
        self.proxies.insert(id, object.clone());
        debug!(host = %self.host, object = id.0, "subscribed");

        Ok(ObjectHandle {
            id,
            object,
            connection: self.clone(),
        })
    }

    /// Drops a subscription: the proxy stops receiving events and the
    /// server is told to stop sending them. When it was the last one,
    /// the session layer's disconnect policy runs.
    pub fn unsubscribe(&self, id: ObjectId) -> Result<(), ClientError> {
        if self.proxies.remove(id) {
            self.send_upstream(&Upstream::Unsubscribe { id })?;
            debug!(host = %self.host, object = id.0, "unsubscribed");
            if self.proxies.is_empty() {
                if let Some(hook) = self.on_idle.lock().unwrap().as_ref() {
                    hook();
                }
            }
        }
        Ok(())
    }

    /// Asks the write loop to close the channel.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(host = %self.host, "closing connection");
            let _ = self.outbound.send(Outbound::Shutdown);
            // Proxies hold this connection through their service
            // callers; dropping them breaks the reference cycle.
            self.proxies.clear();
        }
    }

    fn send_upstream(&self, message: &Upstream) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let mut w = BinWriter::new();
        message.write(&mut w, &self.registry)?;
        let framed = frame(&w.into_bytes())?;
        self.outbound
            .send(Outbound::Frame(framed))
            .map_err(|_| ClientError::ConnectionClosed)
    }

    fn route(&self, message: Downstream) {
        match message {
            Downstream::Event(record) => {
                let proxies = self.proxies.clone();
                let host = self.host.clone();
                self.dispatcher.run(Box::new(move || {
                    if let Err(err) = proxies.deliver(record) {
                        error!(%host, %err, "event delivery failed");
                    }
                }));
            }
            Downstream::SubscribeResult { req_id, result } => {
                let waiter = self.pending_subs.lock().unwrap().remove(&req_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => error!(
                        host = %self.host,
                        req_id,
                        "subscribe result with no pending request"
                    ),
                }
            }
            Downstream::CallResult { call_id, result } => {
                let waiter =
                    self.pending_calls.lock().unwrap().remove(&call_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => error!(
                        host = %self.host,
                        call_id,
                        "call result with no pending call"
                    ),
                }
            }
        }
    }

    /// Drops every waiter. Their receivers resolve as closed, which
    /// the callers surface as connection loss.
    fn fail_pending(&self) {
        self.pending_subs.lock().unwrap().clear();
        self.pending_calls.lock().unwrap().clear();
    }
}

impl ServiceCaller for Connection {
    fn call(
        &self,
        service: TypeCode,
        method: u8,
        args: Vec<Value>,
    ) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        self.pending_calls.lock().unwrap().insert(call_id, tx);

        let message = Upstream::ServiceCall {
            call_id,
            service,
            method,
            args,
        };
        if self.send_upstream(&message).is_err() {
            // dropping the sender resolves the receiver as closed
            self.pending_calls.lock().unwrap().remove(&call_id);
        }
        rx
    }
}

async fn write_loop<C: Channel>(
    channel: Arc<C>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(bytes) => {
                if let Err(err) = channel.send(&bytes).await {
                    warn!(channel = %channel.id(), %err, "send failed");
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = channel.close().await;
}

async fn read_loop<C: Channel>(channel: Arc<C>, connection: Arc<Connection>) {
    let mut frames = FrameReader::new();
    loop {
        let chunk = match channel.recv().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                info!(host = %connection.host, "peer closed connection");
                break;
            }
            Err(err) => {
                if !connection.is_closed() {
                    warn!(host = %connection.host, %err, "receive failed");
                }
                break;
            }
        };
        frames.feed(&chunk);
        loop {
            match frames.next_frame() {
                Ok(Some(payload)) => {
                    let mut r = BinReader::new(&payload);
                    match Downstream::read(&mut r, &connection.registry) {
                        Ok(message) => connection.route(message),
                        Err(err) => {
                            error!(
                                host = %connection.host,
                                %err,
                                "undecodable frame, dropping connection"
                            );
                            connection.shutdown();
                            connection.fail_pending();
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!(
                        host = %connection.host,
                        %err,
                        "framing violation, dropping connection"
                    );
                    connection.shutdown();
                    connection.fail_pending();
                    return;
                }
            }
        }
    }
    connection.shutdown();
    connection.fail_pending();
}

/// A typed handle to a subscribed proxy object.
pub struct ObjectHandle<O: NexusObject> {
    id: ObjectId,
    object: Arc<Mutex<O>>,
    connection: Arc<Connection>,
}

impl<O: NexusObject> std::fmt::Debug for ObjectHandle<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<O: NexusObject> ObjectHandle<O> {
    /// The server-assigned object id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Runs `f` against the proxy under its lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut O) -> R) -> R {
        let mut guard = self.object.lock().unwrap();
        f(&mut guard)
    }

    /// The connection this subscription lives on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Ends the subscription.
    pub fn unsubscribe(self) -> Result<(), ClientError> {
        self.connection.unsubscribe(self.id)
    }
}

impl<O: NexusObject> Clone for ObjectHandle<O> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            object: self.object.clone(),
            connection: self.connection.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nexus_object::{DAttribute, DService, DValue, InlineDispatcher};
    use nexus_transport::{TcpChannel, TcpTransport, Transport};
    use nexus_wire::{EventPayload, EventRecord};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    struct Panel {
        level: DValue<i32>,
        control: DService,
    }

    impl Default for Panel {
        fn default() -> Self {
            Self {
                level: DValue::default(),
                control: DService::new(TypeCode(9)),
            }
        }
    }

    impl NexusObject for Panel {
        fn visit_attributes(
            &mut self,
            visit: &mut dyn FnMut(&mut dyn DAttribute),
        ) {
            visit(&mut self.level);
            visit(&mut self.control);
        }
    }

    /// Opens a channel to a throwaway listener that accepts one socket
    /// and holds it open.
    async fn idle_channel() -> (String, TcpChannel, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let _socket = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let channel = TcpTransport.connect(&host).await.unwrap();
        (host, channel, server)
    }

    fn panel_proxy(connection: &Arc<Connection>) -> Arc<Mutex<Panel>> {
        let mut panel = Panel::default();
        init_attributes(&mut panel, ObjectId(1), Arc::new(PassiveSink::new()));
        let caller: Arc<dyn ServiceCaller> = connection.clone();
        panel.visit_attributes(&mut |attr| attr.attach_caller(caller.clone()));
        Arc::new(Mutex::new(panel))
    }

    #[tokio::test]
    async fn test_shutdown_releases_proxies_holding_the_connection() {
        let (host, channel, server) = idle_channel().await;
        let connection = Connection::start(
            host,
            channel,
            Arc::new(Registry::new()),
            Arc::new(InlineDispatcher),
        );

        // Same shape subscribe() builds: the proxy's service attribute
        // points back at its connection.
        connection.proxies.insert(ObjectId(1), panel_proxy(&connection));
        assert_eq!(connection.subscription_count(), 1);

        let weak = Arc::downgrade(&connection);
        connection.shutdown();
        drop(connection);

        for _ in 0..200 {
            if weak.upgrade().is_none() {
                server.abort();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("closed connection kept alive by its own proxies");
    }

    #[tokio::test]
    async fn test_events_apply_through_the_dispatcher() {
        struct QueueDispatcher {
            tasks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
        }

        impl Dispatcher for QueueDispatcher {
            fn run(&self, task: Box<dyn FnOnce() + Send>) {
                self.tasks.lock().unwrap().push(task);
            }
        }

        let (host, channel, server) = idle_channel().await;
        let dispatcher = Arc::new(QueueDispatcher {
            tasks: Mutex::new(Vec::new()),
        });
        let connection = Connection::start(
            host,
            channel,
            Arc::new(Registry::new()),
            dispatcher.clone(),
        );

        let panel = panel_proxy(&connection);
        connection.proxies.insert(ObjectId(1), panel.clone());

        connection.route(Downstream::Event(EventRecord {
            object: ObjectId(1),
            attr: 0,
            payload: EventPayload::ValueChanged {
                new: Value::Int(5),
                old: Value::Int(0),
            },
        }));

        assert_eq!(
            panel.lock().unwrap().level.get(),
            0,
            "nothing applies until the dispatcher runs the callback"
        );

        let tasks: Vec<_> =
            std::mem::take(&mut *dispatcher.tasks.lock().unwrap());
        for task in tasks {
            task();
        }
        assert_eq!(panel.lock().unwrap().level.get(), 5);

        connection.shutdown();
        server.abort();
    }
}
