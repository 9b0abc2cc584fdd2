//! Distributed object model: synchronized attributes, event delivery,
//! and the object contract both runtimes share.
//!
//! An object is a plain struct whose replicated fields are attribute
//! types from this crate. Declaring [`NexusObject`] for it wires all
//! of them up:
//!
//! ```
//! use nexus_object::{DAttribute, DMap, DValue, NexusObject};
//!
//! #[derive(Default)]
//! struct Lobby {
//!     name: DValue<String>,
//!     players: DMap<String, i32>,
//! }
//!
//! impl NexusObject for Lobby {
//!     fn visit_attributes(&mut self, visit: &mut dyn FnMut(&mut dyn DAttribute)) {
//!         visit(&mut self.name);
//!         visit(&mut self.players);
//!     }
//! }
//! ```
//!
//! Local mutation is synchronous: the store changes, listeners fire on
//! the calling thread, and the event reaches the attached sink before
//! the mutator returns. Remote events arrive through [`apply_event`]
//! and fire the same listeners without re-posting.

mod attribute;
mod dispatch;
mod error;
mod event;
mod object;
mod service;

pub use attribute::{DAttribute, DMap, DValue, Datum, ListenerKey};
pub use dispatch::{Dispatcher, InlineDispatcher, ProxyTable};
pub use error::ObjectError;
pub use event::{EventSink, PassiveSink};
pub use object::{
    apply_event, attribute_count, init_attributes, restore, snapshot,
    with_attribute, Address, NexusObject,
};
pub use service::{
    CallFuture, CallOutcome, DService, MethodHandler, PendingCall,
    ServiceCaller, ServiceDispatcher,
};
