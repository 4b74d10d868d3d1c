//! The room: presence and messaging wired over one store.

use crate::clock::Clock;
use crate::error::RelayError;
use crate::message::Message;
use crate::presence::{Participant, PresenceRegistry};
use crate::router::MessageRouter;
use crate::store::Store;
use crate::sweeper::{ExpirySweeper, SweeperConfig};
use std::sync::Arc;

/// Entry point for transports.
///
/// Cloning is cheap; every clone shares the same store.
#[derive(Clone)]
pub struct Room {
    registry: PresenceRegistry,
    router: MessageRouter,
}

impl Room {
    /// Build a room over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let registry = PresenceRegistry::new(store.clone(), clock.clone());
        let router = MessageRouter::new(store, clock, registry.clone());
        Self { registry, router }
    }

    /// The presence registry.
    #[must_use]
    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// The message router.
    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Create an expiry sweeper for this room.
    #[must_use]
    pub fn sweeper(&self, config: SweeperConfig) -> ExpirySweeper {
        ExpirySweeper::new(self.registry.clone(), self.router.clone(), config)
    }

    /// Join the room as `name`.
    ///
    /// # Errors
    ///
    /// See [`PresenceRegistry::join`].
    pub async fn join(&self, name: &str) -> Result<Participant, RelayError> {
        self.registry.join(name, &self.router).await
    }

    /// Signal that `name` is still active.
    ///
    /// # Errors
    ///
    /// See [`PresenceRegistry::heartbeat`].
    pub async fn heartbeat(&self, name: &str) -> Result<(), RelayError> {
        self.registry.heartbeat(name).await
    }

    /// Everyone currently in the room.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store cannot be read.
    pub async fn list_participants(&self) -> Result<Vec<Participant>, RelayError> {
        Ok(self.registry.list_active().await?)
    }

    /// Post a message from `from`.
    ///
    /// # Errors
    ///
    /// See [`MessageRouter::post`].
    pub async fn post_message(
        &self,
        from: &str,
        to: &str,
        text: &str,
        kind: &str,
    ) -> Result<Message, RelayError> {
        self.router.post(from, to, text, kind).await
    }

    /// Messages visible to `viewer`.
    ///
    /// # Errors
    ///
    /// See [`MessageRouter::list`].
    pub async fn list_messages(
        &self,
        viewer: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, RelayError> {
        self.router.list(viewer, limit).await
    }
}
