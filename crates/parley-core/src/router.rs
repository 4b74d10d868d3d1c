//! Message routing for Parley.
//!
//! The router creates messages with validated addressing and serves history
//! filtered by the visibility predicate.

use crate::clock::Clock;
use crate::error::RelayError;
use crate::message::{Message, MessageKind, JOIN_TEXT, LEAVE_TEXT};
use crate::presence::{Announcer, PresenceRegistry};
use crate::store::Store;
use crate::validate::validate_post;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

/// The message router.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    registry: PresenceRegistry,
}

impl MessageRouter {
    /// Create a router that checks addressing against `registry`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, registry: PresenceRegistry) -> Self {
        Self {
            store,
            clock,
            registry,
        }
    }

    /// Post a user message.
    ///
    /// `kind` is the wire name (`message` or `private_message`). The sender
    /// must be present; a private recipient must be present too.
    ///
    /// # Errors
    ///
    /// `InvalidMessage`, `UnknownSender`, `UnknownRecipient`, or `StoreUnavailable`.
    pub async fn post(
        &self,
        from: &str,
        to: &str,
        text: &str,
        kind: &str,
    ) -> Result<Message, RelayError> {
        let kind = validate_post(from, to, text, kind).map_err(RelayError::InvalidMessage)?;

        if !self.registry.exists(from).await? {
            return Err(RelayError::UnknownSender(from.to_string()));
        }
        if kind == MessageKind::Private && !self.registry.exists(to).await? {
            return Err(RelayError::UnknownRecipient(to.to_string()));
        }

        let message = self
            .append(Message::new(from, to, text, kind, self.clock.now()))
            .await?;
        debug!(from = %from, to = %to, kind = %kind, id = message.id, "Posted message");
        Ok(message)
    }

    /// Record that `name` left the room.
    ///
    /// Skips sender validation, since the participant is already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn announce_departure(&self, name: &str) -> Result<Message, RelayError> {
        self.append(Message::status(name, LEAVE_TEXT, self.clock.now()))
            .await
    }

    /// Get up to `limit` messages visible to `viewer`, oldest first.
    ///
    /// When more messages are visible than `limit`, the newest ones are kept.
    /// `None` returns the whole visible history. `viewer` need not be present.
    ///
    /// # Errors
    ///
    /// `InvalidLimit` if `limit < 1`, or `StoreUnavailable`.
    pub async fn list(&self, viewer: &str, limit: Option<i64>) -> Result<Vec<Message>, RelayError> {
        let limit = match limit {
            Some(n) if n < 1 => return Err(RelayError::InvalidLimit(n)),
            Some(n) => Some(usize::try_from(n).unwrap_or(usize::MAX)),
            None => None,
        };

        let visible = |m: &Message| m.is_visible_to(viewer);
        let messages = self.store.query_messages(&visible, limit).await?;
        trace!(viewer = %viewer, count = messages.len(), "Listed messages");
        Ok(messages)
    }

    async fn append(&self, mut message: Message) -> Result<Message, RelayError> {
        message.id = self.store.append_message(message.clone()).await?;
        Ok(message)
    }
}

#[async_trait]
impl Announcer for MessageRouter {
    async fn announce_arrival(&self, name: &str) -> Result<Message, RelayError> {
        self.append(Message::status(name, JOIN_TEXT, self.clock.now()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::message::BROADCAST;
    use crate::store::MemoryStore;

    fn setup() -> (PresenceRegistry, MessageRouter) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let registry = PresenceRegistry::new(store.clone(), clock.clone());
        let router = MessageRouter::new(store, clock, registry.clone());
        (registry, router)
    }

    async fn join_all(registry: &PresenceRegistry, router: &MessageRouter, names: &[&str]) {
        for name in names {
            registry.join(name, router).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_join_notice_visible() {
        let (registry, router) = setup();
        join_all(&registry, &router, &["Ann"]).await;

        let history = router.list("Ann", Some(10)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MessageKind::Status);
        assert_eq!(history[0].to, BROADCAST);
        assert_eq!(history[0].from, "Ann");
        assert_eq!(history[0].text, JOIN_TEXT);
    }

    #[tokio::test]
    async fn test_post_broadcast() {
        let (registry, router) = setup();
        join_all(&registry, &router, &["Ann"]).await;

        let msg = router.post("Ann", BROADCAST, "hello", "message").await.unwrap();
        assert_eq!(msg.kind, MessageKind::Chat);
        assert!(msg.id > 0);
    }

    #[tokio::test]
    async fn test_post_unknown_sender() {
        let (_, router) = setup();
        assert!(matches!(
            router.post("Ghost", BROADCAST, "boo", "message").await,
            Err(RelayError::UnknownSender(_))
        ));
    }

    #[tokio::test]
    async fn test_post_unknown_recipient() {
        let (registry, router) = setup();
        join_all(&registry, &router, &["Ann"]).await;

        assert!(matches!(
            router.post("Ann", "Bob", "hi", "private_message").await,
            Err(RelayError::UnknownRecipient(_))
        ));
    }

    #[tokio::test]
    async fn test_chat_to_absent_name_allowed() {
        let (registry, router) = setup();
        join_all(&registry, &router, &["Ann"]).await;

        // Only private messages require a present recipient.
        assert!(router.post("Ann", "Bob", "hi", "message").await.is_ok());
    }

    #[tokio::test]
    async fn test_post_invalid_fields() {
        let (registry, router) = setup();
        join_all(&registry, &router, &["Ann"]).await;

        match router.post("Ann", "", "", "status").await {
            Err(RelayError::InvalidMessage(errors)) => {
                assert!(errors.has("to"));
                assert!(errors.has("text"));
                assert!(errors.has("type"));
            }
            other => panic!("expected InvalidMessage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_private_visibility() {
        let (registry, router) = setup();
        join_all(&registry, &router, &["Ann", "Bob", "Cid"]).await;

        router.post("Ann", "Bob", "secret", "private_message").await.unwrap();

        let has_secret = |msgs: Vec<Message>| msgs.iter().any(|m| m.text == "secret");
        assert!(has_secret(router.list("Ann", None).await.unwrap()));
        assert!(has_secret(router.list("Bob", None).await.unwrap()));
        assert!(!has_secret(router.list("Cid", None).await.unwrap()));
    }

    #[tokio::test]
    async fn test_departed_viewer_keeps_history() {
        let (registry, router) = setup();
        join_all(&registry, &router, &["Ann", "Bob"]).await;
        router.post("Ann", "Bob", "bye", "private_message").await.unwrap();
        registry.evict("Bob").await.unwrap();

        let history = router.list("Bob", None).await.unwrap();
        assert!(history.iter().any(|m| m.text == "bye"));
    }

    #[tokio::test]
    async fn test_list_limit() {
        let (registry, router) = setup();
        join_all(&registry, &router, &["Ann"]).await;
        for i in 0..4 {
            router
                .post("Ann", BROADCAST, &format!("line {i}"), "message")
                .await
                .unwrap();
        }

        // Join notice plus four lines.
        assert_eq!(router.list("Ann", None).await.unwrap().len(), 5);

        let tail = router.list("Ann", Some(3)).await.unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].text, "line 1");
        assert_eq!(tail[2].text, "line 3");
        assert!(tail.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_list_invalid_limit() {
        let (_, router) = setup();
        assert!(matches!(
            router.list("Ann", Some(0)).await,
            Err(RelayError::InvalidLimit(0))
        ));
        assert!(matches!(
            router.list("Ann", Some(-2)).await,
            Err(RelayError::InvalidLimit(-2))
        ));
    }
}
