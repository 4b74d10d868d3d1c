//! Persistence interface for Parley.
//!
//! The core only touches durable state through [`Store`]. Races the core
//! cares about (duplicate joins, concurrent evictions) are settled by the
//! store's conditional primitives, never by in-process locks held across a
//! store round trip.

pub mod memory;
pub mod resilient;

use crate::error::StoreError;
use crate::message::{Message, MessageId};
use crate::presence::Participant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use resilient::{Backoff, ResilientStore, StorePolicy};

/// Predicate over messages, evaluated inside the store.
pub type MessageFilter<'a> = &'a (dyn Fn(&Message) -> bool + Send + Sync);

/// Durable storage for the participant and message collections.
///
/// Implementations must return [`StoreError::Unavailable`] only when the
/// operation was not applied, so callers may retry it safely.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Insert `participant` unless its name is already present.
    ///
    /// Returns `false` if the name already existed. Must be atomic.
    async fn insert_participant_if_absent(
        &self,
        participant: Participant,
    ) -> Result<bool, StoreError>;

    /// Look up a participant by name.
    async fn get_participant(&self, name: &str) -> Result<Option<Participant>, StoreError>;

    /// Set a participant's `last_seen`.
    ///
    /// Returns `false` if the name is absent.
    async fn touch_participant(&self, name: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Delete a participant.
    ///
    /// With `expected_last_seen`, the delete only happens if the stored
    /// `last_seen` still equals it. Returns `false` if nothing was removed.
    async fn delete_participant(
        &self,
        name: &str,
        expected_last_seen: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Every participant, in no particular order.
    async fn list_participants(&self) -> Result<Vec<Participant>, StoreError>;

    /// Append a message and return the identifier it was stored under.
    async fn append_message(&self, message: Message) -> Result<MessageId, StoreError>;

    /// The newest `limit` messages matching `filter`, oldest first.
    ///
    /// `None` returns every match.
    async fn query_messages(
        &self,
        filter: MessageFilter<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError>;
}
