//! The entity registry: named server-side state with single-threaded
//! access.
//!
//! Every registered entity is owned by a dedicated task that drains a
//! mailbox of actions. Callers never touch the entity directly; they
//! send closures, which the task runs one at a time against the
//! instance it owns. That gives each entity strictly serial access
//! with no locks in caller code.
//!
//! Entities come in two flavors: singletons (one instance per type)
//! and keyed (many instances per type, distinguished by an `i64` key).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::EntityError;

/// Marker for types that can live in the registry. Blanket-implemented
/// for everything sendable.
pub trait Entity: Send + 'static {}

impl<T: Send + 'static> Entity for T {}

/// A unit of work shipped to an entity's task.
type Action<E> = Box<dyn FnOnce(&mut E) + Send>;

#[derive(PartialEq, Eq, Hash)]
struct EntityKey {
    type_id: TypeId,
    key: Option<i64>,
}

/// Registry of live entities.
///
/// Registration hands the instance to a spawned task; lookups return
/// nothing but route closures into that task's mailbox.
#[derive(Default)]
pub struct ObjectManager {
    entries: Mutex<HashMap<EntityKey, Box<dyn Any + Send + Sync>>>,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the singleton instance of `E`, replacing any previous
    /// one. The old instance's task ends once its mailbox drains.
    pub fn register_singleton<E: Entity>(&self, entity: E) {
        self.install(None, entity);
    }

    /// Registers an instance of `E` under `key`.
    pub fn register_keyed<E: Entity>(&self, key: i64, entity: E) {
        self.install(Some(key), entity);
    }

    fn install<E: Entity>(&self, key: Option<i64>, entity: E) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Action<E>>();
        tokio::spawn(async move {
            let mut entity = entity;
            while let Some(action) = rx.recv().await {
                action(&mut entity);
            }
        });
        debug!(
            entity = std::any::type_name::<E>(),
            key = ?key,
            "entity registered"
        );
        self.entries.lock().unwrap().insert(
            EntityKey {
                type_id: TypeId::of::<E>(),
                key,
            },
            Box::new(tx),
        );
    }

    fn sender<E: Entity>(
        &self,
        key: Option<i64>,
    ) -> Result<mpsc::UnboundedSender<Action<E>>, EntityError> {
        let entries = self.entries.lock().unwrap();
        let entry = entries
            .get(&EntityKey {
                type_id: TypeId::of::<E>(),
                key,
            })
            .ok_or_else(|| match key {
                None => {
                    EntityError::UnknownSingleton(std::any::type_name::<E>())
                }
                Some(key) => EntityError::UnknownKeyed {
                    type_name: std::any::type_name::<E>(),
                    key,
                },
            })?;
        let tx = entry
            .downcast_ref::<mpsc::UnboundedSender<Action<E>>>()
            .ok_or(EntityError::MailboxClosed)?;
        Ok(tx.clone())
    }

    /// Queues `action` against the singleton of `E`. Fire and forget:
    /// returns once the action is enqueued. When no singleton is
    /// registered the action is dropped unrun and an error returned.
    pub fn invoke<E: Entity>(
        &self,
        action: impl FnOnce(&mut E) + Send + 'static,
    ) -> Result<(), EntityError> {
        let tx = self.sender::<E>(None)?;
        tx.send(Box::new(action))
            .map_err(|_| EntityError::MailboxClosed)
    }

    /// Queues `action` against the instance of `E` under `key`.
    pub fn invoke_keyed<E: Entity>(
        &self,
        key: i64,
        action: impl FnOnce(&mut E) + Send + 'static,
    ) -> Result<(), EntityError> {
        let tx = self.sender::<E>(Some(key))?;
        tx.send(Box::new(action))
            .map_err(|_| EntityError::MailboxClosed)
    }

    /// Runs `action` against the singleton of `E` and returns its
    /// result once the entity task has executed it.
    pub async fn request<E, R>(
        &self,
        action: impl FnOnce(&mut E) -> R + Send + 'static,
    ) -> Result<R, EntityError>
    where
        E: Entity,
        R: Send + 'static,
    {
        let tx = self.sender::<E>(None)?;
        Self::round_trip(tx, action).await
    }

    /// Runs `action` against the instance under `key` and returns its
    /// result.
    pub async fn request_keyed<E, R>(
        &self,
        key: i64,
        action: impl FnOnce(&mut E) -> R + Send + 'static,
    ) -> Result<R, EntityError>
    where
        E: Entity,
        R: Send + 'static,
    {
        let tx = self.sender::<E>(Some(key))?;
        Self::round_trip(tx, action).await
    }

    async fn round_trip<E, R>(
        tx: mpsc::UnboundedSender<Action<E>>,
        action: impl FnOnce(&mut E) -> R + Send + 'static,
    ) -> Result<R, EntityError>
    where
        E: Entity,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Box::new(move |entity: &mut E| {
            let _ = reply_tx.send(action(entity));
        }))
        .map_err(|_| EntityError::MailboxClosed)?;
        reply_rx.await.map_err(|_| EntityError::MailboxClosed)
    }

    /// `true` if a singleton of `E` is registered.
    pub fn has<E: Entity>(&self) -> bool {
        self.contains(TypeId::of::<E>(), None)
    }

    /// `true` if an instance of `E` is registered under `key`.
    pub fn has_keyed<E: Entity>(&self, key: i64) -> bool {
        self.contains(TypeId::of::<E>(), Some(key))
    }

    fn contains(&self, type_id: TypeId, key: Option<i64>) -> bool {
        self.entries
            .lock()
            .unwrap()
            .contains_key(&EntityKey { type_id, key })
    }

    /// Removes the singleton of `E`. Its task finishes the actions
    /// already queued, then exits. Returns `false` when nothing was
    /// registered.
    pub fn clear_singleton<E: Entity>(&self) -> bool {
        self.evict(TypeId::of::<E>(), None)
    }

    /// Removes the instance of `E` under `key`.
    pub fn clear_keyed<E: Entity>(&self, key: i64) -> bool {
        self.evict(TypeId::of::<E>(), Some(key))
    }

    fn evict(&self, type_id: TypeId, key: Option<i64>) -> bool {
        self.entries
            .lock()
            .unwrap()
            .remove(&EntityKey { type_id, key })
            .is_some()
    }
}
