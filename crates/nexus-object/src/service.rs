//! Service attributes: request/response calls carried over the same
//! event channel as state changes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use nexus_wire::{EventPayload, ObjectId, TypeCode, Value};
use tokio::sync::oneshot;

use crate::event::EventSink;
use crate::ObjectError;

/// The outcome of a remote call: a wire value on success, a message on
/// failure. Failures travel back to the caller rather than tearing
/// down the connection.
pub type CallOutcome = Result<Value, String>;

/// Boxed future returned by service method handlers.
pub type CallFuture = BoxFuture<'static, CallOutcome>;

/// Transport-side hook a service attribute calls through. The client
/// runtime installs one per connection; it owns call-id assignment and
/// the pending-response table.
pub trait ServiceCaller: Send + Sync {
    /// Issues a call and returns the receiver that resolves when the
    /// response arrives.
    fn call(
        &self,
        service: TypeCode,
        method: u8,
        args: Vec<Value>,
    ) -> oneshot::Receiver<CallOutcome>;
}

/// An in-flight call handle.
#[derive(Debug)]
pub struct PendingCall {
    rx: oneshot::Receiver<CallOutcome>,
}

impl PendingCall {
    /// Waits for the response. A dropped connection resolves as an
    /// error rather than hanging forever.
    pub async fn outcome(self) -> CallOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err("connection closed before response".into()),
        }
    }
}

/// A callable service attribute. Unlike value and map attributes it
/// holds no replicated state: snapshots are `None` and restore is a
/// no-op.
pub struct DService {
    service: TypeCode,
    caller: Option<Arc<dyn ServiceCaller>>,
    index: u16,
    owner: ObjectId,
}

impl DService {
    pub fn new(service: TypeCode) -> Self {
        Self {
            service,
            caller: None,
            index: 0,
            owner: ObjectId(0),
        }
    }

    /// The service code methods are dispatched under.
    pub fn service(&self) -> TypeCode {
        self.service
    }

    /// Installs the transport hook. The client runtime does this when
    /// a proxy is built; unbound services fail calls immediately.
    pub fn attach(&mut self, caller: Arc<dyn ServiceCaller>) {
        self.caller = Some(caller);
    }

    /// Issues a call on this service. Fails immediately when no caller
    /// is attached (a server-side or unbound instance).
    pub fn invoke(
        &self,
        method: u8,
        args: Vec<Value>,
    ) -> Result<PendingCall, ObjectError> {
        let caller = self.caller.as_ref().ok_or(ObjectError::ServiceUnbound {
            object: self.owner,
            service: self.service,
        })?;
        let rx = caller.call(self.service, method, args);
        Ok(PendingCall { rx })
    }
}

impl crate::DAttribute for DService {
    fn bind(&mut self, owner: ObjectId, index: u16, _sink: Arc<dyn EventSink>) {
        self.owner = owner;
        self.index = index;
    }

    fn index(&self) -> u16 {
        self.index
    }

    fn apply(&mut self, _payload: EventPayload) -> Result<(), ObjectError> {
        Err(ObjectError::NotApplicable("service"))
    }

    fn snapshot(&self) -> Option<Value> {
        None
    }

    fn restore(&mut self, snapshot: Option<Value>) -> Result<(), ObjectError> {
        match snapshot {
            None => Ok(()),
            Some(_) => Err(ObjectError::BadSnapshot(
                "service attribute carries no state".into(),
            )),
        }
    }

    fn attach_caller(&mut self, caller: Arc<dyn ServiceCaller>) {
        self.attach(caller);
    }
}

// ---------------------------------------------------------------------------
// Server-side dispatch
// ---------------------------------------------------------------------------

/// A method handler: takes decoded arguments, produces an outcome.
pub type MethodHandler =
    Arc<dyn Fn(u8, Vec<Value>) -> CallFuture + Send + Sync>;

/// Routes incoming service calls to registered handlers by service
/// code. Handlers receive the method id and raw argument list and do
/// their own per-method decoding.
#[derive(Default)]
pub struct ServiceDispatcher {
    handlers: HashMap<TypeCode, MethodHandler>,
}

impl ServiceDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for a service code, replacing any
    /// previous registration.
    pub fn register<F, Fut>(&mut self, service: TypeCode, handler: F)
    where
        F: Fn(u8, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallOutcome> + Send + 'static,
    {
        self.handlers.insert(
            service,
            Arc::new(move |method, args| Box::pin(handler(method, args))),
        );
    }

    /// Dispatches a call. Unknown service codes resolve as call
    /// failures so the caller gets an answer either way.
    pub fn dispatch(
        &self,
        service: TypeCode,
        method: u8,
        args: Vec<Value>,
    ) -> CallFuture {
        match self.handlers.get(&service) {
            Some(handler) => handler(method, args),
            None => Box::pin(async move {
                Err(format!("no handler for service {}", service.0))
            }),
        }
    }
}
