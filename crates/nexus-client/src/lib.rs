//! Client runtime: connections, subscriptions, and per-host session
//! management.
//!
//! The entry point is [`SessionManager`]. Ask it for a host and it
//! returns the shared [`Connection`], dialing at most once no matter
//! how many tasks race for it. From a connection,
//! [`subscribe`](Connection::subscribe) builds a typed local proxy of
//! a remote object that tracks every server-side mutation.

mod config;
mod connection;
mod error;
mod session;

pub use config::{ClientConfig, DisconnectPolicy};
pub use connection::{Connection, ObjectHandle};
pub use error::ClientError;
pub use session::SessionManager;
