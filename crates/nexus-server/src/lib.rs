//! Server runtime: the entity registry, the hosted-object space, and
//! the connection accept loop.
//!
//! Three layers stack here. [`ObjectManager`] holds named server state
//! behind per-entity mailbox tasks. [`ObjectSpace`] holds the objects
//! clients may subscribe to and fans their events out. [`NexusServer`]
//! accepts channels and runs one handler task per connection.

mod error;
mod handler;
mod manager;
mod server;
mod space;

pub use error::{EntityError, ServerError};
pub use manager::{Entity, ObjectManager};
pub use server::{NexusServer, NexusServerBuilder};
pub use space::{BroadcastSink, ObjectSpace};
