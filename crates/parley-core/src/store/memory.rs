//! In-process [`Store`] backed by concurrent maps.

use super::{MessageFilter, Store};
use crate::error::StoreError;
use crate::message::{Message, MessageId};
use crate::presence::Participant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

/// A [`Store`] that keeps everything in memory.
///
/// Participants live in a sharded map so conditional inserts and deletes are
/// atomic per name. Messages are an append-only log.
#[derive(Debug, Default)]
pub struct MemoryStore {
    participants: DashMap<String, Participant>,
    messages: RwLock<Vec<Message>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_participant_if_absent(
        &self,
        participant: Participant,
    ) -> Result<bool, StoreError> {
        match self.participants.entry(participant.name.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(participant);
                Ok(true)
            }
        }
    }

    async fn get_participant(&self, name: &str) -> Result<Option<Participant>, StoreError> {
        Ok(self.participants.get(name).map(|p| p.clone()))
    }

    async fn touch_participant(&self, name: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.participants.get_mut(name) {
            Some(mut p) => {
                p.last_seen = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_participant(
        &self,
        name: &str,
        expected_last_seen: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let removed = self
            .participants
            .remove_if(name, |_, p| {
                expected_last_seen.map_or(true, |expected| p.last_seen == expected)
            })
            .is_some();
        Ok(removed)
    }

    async fn list_participants(&self) -> Result<Vec<Participant>, StoreError> {
        Ok(self.participants.iter().map(|p| p.value().clone()).collect())
    }

    async fn append_message(&self, mut message: Message) -> Result<MessageId, StoreError> {
        let mut log = self.messages.write().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        message.id = id;
        trace!(id, kind = %message.kind, "Appended message");
        log.push(message);
        Ok(id)
    }

    async fn query_messages(
        &self,
        filter: MessageFilter<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError> {
        let log = self.messages.read().await;
        let mut newest: Vec<Message> = log
            .iter()
            .rev()
            .filter(|m| filter(*m))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        newest.reverse();
        Ok(newest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageKind, BROADCAST};
    use chrono::Duration;

    fn chat(from: &str, text: &str) -> Message {
        Message::new(from, BROADCAST, text, MessageKind::Chat, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = MemoryStore::new();
        let now = Utc::now();

        assert!(store
            .insert_participant_if_absent(Participant::new("Ann", now))
            .await
            .unwrap());
        assert!(!store
            .insert_participant_if_absent(Participant::new("Ann", now))
            .await
            .unwrap());
        assert_eq!(store.list_participants().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_guarded_delete() {
        let store = MemoryStore::new();
        let seen = Utc::now();
        store
            .insert_participant_if_absent(Participant::new("Ann", seen))
            .await
            .unwrap();

        let later = seen + Duration::seconds(1);
        assert!(store.touch_participant("Ann", later).await.unwrap());

        // Stale guard no longer matches.
        assert!(!store.delete_participant("Ann", Some(seen)).await.unwrap());
        assert!(store.delete_participant("Ann", Some(later)).await.unwrap());
        assert!(!store.delete_participant("Ann", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_missing() {
        let store = MemoryStore::new();
        assert!(!store.touch_participant("Ghost", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let a = store.append_message(chat("Ann", "one")).await.unwrap();
        let b = store.append_message(chat("Ann", "two")).await.unwrap();
        assert!(b > a);
        assert_eq!(store.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_query_returns_newest_in_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.append_message(chat("Ann", &i.to_string())).await.unwrap();
        }

        let all = |_: &Message| true;
        let tail = store.query_messages(&all, Some(3)).await.unwrap();
        let texts: Vec<&str> = tail.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["2", "3", "4"]);

        let everything = store.query_messages(&all, None).await.unwrap();
        assert_eq!(everything.len(), 5);
    }
}
