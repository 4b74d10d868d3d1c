//! Presence tracking for Parley.
//!
//! The registry owns participant identity: who is in the room, and when they
//! last signaled activity. Name uniqueness is enforced by the store's atomic
//! insert, never by a check-then-insert.

use crate::clock::{elapsed, Clock};
use crate::error::{RelayError, StoreError};
use crate::message::Message;
use crate::store::Store;
use crate::validate::validate_name;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A participant currently in the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Unique, case-sensitive name.
    pub name: String,
    /// Last join or heartbeat.
    #[serde(rename = "lastStatus", with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
}

impl Participant {
    /// Create a participant seen at `at`.
    #[must_use]
    pub fn new(name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            last_seen: at,
        }
    }

    /// Check if this participant is stale (no activity for longer than `threshold`).
    #[must_use]
    pub fn is_stale(&self, now: &DateTime<Utc>, threshold: Duration) -> bool {
        elapsed(&self.last_seen, now) > threshold
    }
}

/// Records the broadcast notice that accompanies a join.
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Record that `name` entered the room.
    async fn announce_arrival(&self, name: &str) -> Result<Message, RelayError>;
}

/// Registry of active participants.
#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl PresenceRegistry {
    /// Create a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Add a participant and announce the arrival.
    ///
    /// If the announcement cannot be recorded the insert is undone, unless
    /// the participant was touched in the meantime or the undo itself fails.
    /// Either way the store error is returned.
    ///
    /// # Errors
    ///
    /// `InvalidName`, `NameTaken`, or `StoreUnavailable`.
    pub async fn join(
        &self,
        name: &str,
        announcer: &dyn Announcer,
    ) -> Result<Participant, RelayError> {
        validate_name(name).map_err(RelayError::InvalidName)?;

        let participant = Participant::new(name, self.clock.now());
        if !self
            .store
            .insert_participant_if_absent(participant.clone())
            .await?
        {
            return Err(RelayError::NameTaken(name.to_string()));
        }

        if let Err(e) = announcer.announce_arrival(name).await {
            self.rollback(&participant).await;
            return Err(e);
        }

        debug!(participant = %name, "Presence: participant joined");
        Ok(participant)
    }

    async fn rollback(&self, participant: &Participant) {
        match self
            .store
            .delete_participant(&participant.name, Some(participant.last_seen))
            .await
        {
            Ok(true) => {
                warn!(participant = %participant.name, "Join notice failed, join rolled back");
            }
            Ok(false) => {
                // Touched since the insert; it stays, with no join notice.
                warn!(
                    participant = %participant.name,
                    "Join notice failed and participant changed before rollback"
                );
            }
            Err(e) => {
                warn!(
                    participant = %participant.name,
                    error = %e,
                    "Join notice failed and rollback failed"
                );
            }
        }
    }

    /// Refresh a participant's `last_seen`.
    ///
    /// # Errors
    ///
    /// `UnknownParticipant` if no such participant, or `StoreUnavailable`.
    pub async fn heartbeat(&self, name: &str) -> Result<(), RelayError> {
        if self.store.touch_participant(name, self.clock.now()).await? {
            debug!(participant = %name, "Presence: heartbeat");
            Ok(())
        } else {
            Err(RelayError::UnknownParticipant(name.to_string()))
        }
    }

    /// Check if a participant is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.store.get_participant(name).await?.is_some())
    }

    /// Get a participant.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get(&self, name: &str) -> Result<Option<Participant>, StoreError> {
        self.store.get_participant(name).await
    }

    /// Get all present participants.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn list_active(&self) -> Result<Vec<Participant>, StoreError> {
        self.store.list_participants().await
    }

    /// Remove a participant unconditionally.
    ///
    /// Returns `false` if there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn evict(&self, name: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete_participant(name, None).await?;
        if removed {
            debug!(participant = %name, "Presence: participant evicted");
        }
        Ok(removed)
    }

    /// Remove a participant only if `last_seen` still equals `observed`.
    ///
    /// A heartbeat or re-join since `observed` makes this a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn evict_if_unchanged(
        &self,
        name: &str,
        observed: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let removed = self.store.delete_participant(name, Some(observed)).await?;
        if removed {
            debug!(participant = %name, "Presence: pruned stale participant");
        }
        Ok(removed)
    }

    /// Current instant according to the registry's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
