//! Timeout and retry decorator for any [`Store`].

use super::{MessageFilter, Store};
use crate::error::StoreError;
use crate::message::{Message, MessageId};
use crate::presence::Participant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^(attempt - 1)`.
    Exponential {
        /// Delay after the first failed attempt.
        base: Duration,
    },
}

impl Backoff {
    /// Exponential backoff starting at `base`.
    #[must_use]
    pub fn exponential(base: Duration) -> Self {
        Self::Exponential { base }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential { base } => {
                let exp = attempt.saturating_sub(1).min(20);
                base.saturating_mul(1u32 << exp)
            }
        }
    }
}

/// Per-call limits applied by [`ResilientStore`].
#[derive(Debug, Clone, Copy)]
pub struct StorePolicy {
    /// Upper bound on a single attempt.
    pub op_timeout: Duration,
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(2),
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(50)),
        }
    }
}

/// Whether repeating an operation after an unknown outcome is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Idempotency {
    Safe,
    Unsafe,
}

impl StoreError {
    fn is_retryable(&self, idempotency: Idempotency) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::TimedOut(_) => idempotency == Idempotency::Safe,
        }
    }
}

/// Wraps a [`Store`] so every call is bounded in time and transient
/// failures are retried with backoff.
///
/// Inserts and appends are never retried after a timeout, since the first
/// attempt may already have been applied.
#[derive(Debug)]
pub struct ResilientStore<S> {
    inner: S,
    policy: StorePolicy,
}

impl<S: Store> ResilientStore<S> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub fn new(inner: S, policy: StorePolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn call<T, F, Fut>(
        &self,
        op: &'static str,
        idempotency: Idempotency,
        mut f: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match timeout(self.policy.op_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::TimedOut(self.policy.op_timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && e.is_retryable(idempotency) => {
                    let delay = self.policy.backoff.delay_at(attempt);
                    warn!(op, attempt, error = %e, ?delay, "Store call failed, retrying");
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: Store> Store for ResilientStore<S> {
    async fn ping(&self) -> Result<(), StoreError> {
        self.call("ping", Idempotency::Safe, || self.inner.ping())
            .await
    }

    async fn insert_participant_if_absent(
        &self,
        participant: Participant,
    ) -> Result<bool, StoreError> {
        self.call("insert_participant_if_absent", Idempotency::Unsafe, || {
            self.inner.insert_participant_if_absent(participant.clone())
        })
        .await
    }

    async fn get_participant(&self, name: &str) -> Result<Option<Participant>, StoreError> {
        self.call("get_participant", Idempotency::Safe, || {
            self.inner.get_participant(name)
        })
        .await
    }

    async fn touch_participant(&self, name: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.call("touch_participant", Idempotency::Safe, || {
            self.inner.touch_participant(name, at)
        })
        .await
    }

    async fn delete_participant(
        &self,
        name: &str,
        expected_last_seen: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let idempotency = if expected_last_seen.is_some() {
            Idempotency::Safe
        } else {
            Idempotency::Unsafe
        };
        self.call("delete_participant", idempotency, || {
            self.inner.delete_participant(name, expected_last_seen)
        })
        .await
    }

    async fn list_participants(&self) -> Result<Vec<Participant>, StoreError> {
        self.call("list_participants", Idempotency::Safe, || {
            self.inner.list_participants()
        })
        .await
    }

    async fn append_message(&self, message: Message) -> Result<MessageId, StoreError> {
        self.call("append_message", Idempotency::Unsafe, || {
            self.inner.append_message(message.clone())
        })
        .await
    }

    async fn query_messages(
        &self,
        filter: MessageFilter<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError> {
        self.call("query_messages", Idempotency::Safe, || {
            self.inner.query_messages(filter, limit)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` pings, then recovers.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
        stall: bool,
    }

    impl FlakyStore {
        fn new(failures: u32, stall: bool) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicU32::new(failures),
                stall,
            }
        }

        async fn maybe_fail(&self) -> Result<(), StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures.store(left - 1, Ordering::SeqCst);
            if self.stall {
                sleep(Duration::from_secs(60)).await;
            }
            Err(StoreError::Unavailable("flaky".into()))
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn ping(&self) -> Result<(), StoreError> {
            self.maybe_fail().await
        }

        async fn insert_participant_if_absent(
            &self,
            participant: Participant,
        ) -> Result<bool, StoreError> {
            self.maybe_fail().await?;
            self.inner.insert_participant_if_absent(participant).await
        }

        async fn get_participant(&self, name: &str) -> Result<Option<Participant>, StoreError> {
            self.inner.get_participant(name).await
        }

        async fn touch_participant(
            &self,
            name: &str,
            at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.touch_participant(name, at).await
        }

        async fn delete_participant(
            &self,
            name: &str,
            expected_last_seen: Option<DateTime<Utc>>,
        ) -> Result<bool, StoreError> {
            self.inner.delete_participant(name, expected_last_seen).await
        }

        async fn list_participants(&self) -> Result<Vec<Participant>, StoreError> {
            self.maybe_fail().await?;
            self.inner.list_participants().await
        }

        async fn append_message(&self, message: Message) -> Result<MessageId, StoreError> {
            self.maybe_fail().await?;
            self.inner.append_message(message).await
        }

        async fn query_messages(
            &self,
            filter: MessageFilter<'_>,
            limit: Option<usize>,
        ) -> Result<Vec<Message>, StoreError> {
            self.inner.query_messages(filter, limit).await
        }
    }

    fn policy(max_attempts: u32) -> StorePolicy {
        StorePolicy {
            op_timeout: Duration::from_millis(100),
            max_attempts,
            backoff: Backoff::exponential(Duration::from_millis(1)),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let backoff = Backoff::exponential(Duration::from_millis(10));
        assert_eq!(backoff.delay_at(1), Duration::from_millis(10));
        assert_eq!(backoff.delay_at(2), Duration::from_millis(20));
        assert_eq!(backoff.delay_at(4), Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_retries_until_available() {
        let store = ResilientStore::new(FlakyStore::new(2, false), policy(3));
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let store = ResilientStore::new(FlakyStore::new(5, false), policy(3));
        assert!(matches!(
            store.list_participants().await,
            Err(StoreError::Unavailable(_))
        ));
        // Three attempts consumed three failures.
        assert_eq!(store.inner().failures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_timed_out() {
        let store = ResilientStore::new(FlakyStore::new(1, true), policy(1));
        assert!(matches!(store.ping().await, Err(StoreError::TimedOut(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsafe_ops_not_retried_after_timeout() {
        let store = ResilientStore::new(FlakyStore::new(1, true), policy(3));
        let msg = Message::status("Ann", "hi", Utc::now());
        assert!(matches!(
            store.append_message(msg).await,
            Err(StoreError::TimedOut(_))
        ));
        assert_eq!(store.inner().inner.message_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_ops_retried_after_timeout() {
        let store = ResilientStore::new(FlakyStore::new(1, true), policy(3));
        assert!(store.list_participants().await.is_ok());
    }
}
