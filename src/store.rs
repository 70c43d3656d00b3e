//! The primary-store seam: the caller-supplied durable backend that
//! `MessagePipeline` saves to and reads from (spec.md §6).
//!
//! Modeled as an object-safe `#[async_trait]` so a caller can back it with
//! Postgres, Mongo, or — in this crate's own tests — an in-memory fake.

use crate::ids::{ConversationId, MessageId, UserId};
use crate::message::{Message, MessageStatus};
use async_trait::async_trait;
use std::fmt;

/// Error raised by a `PrimaryStore`/`ConversationStore` implementation.
///
/// `retryable` is the flag `RetryScheduler` and `CircuitBreakerPolicy`
/// consult to decide whether a failure should ever be retried — it is set by
/// the store implementation, not inferred here, since only the store knows
/// whether a given failure is transient.
#[derive(Debug, Clone)]
pub struct StoreError {
    pub message: String,
    pub retryable: bool,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for crate::error::CoreError {
    fn from(e: StoreError) -> Self {
        if e.retryable {
            crate::error::CoreError::Transient(e.message)
        } else {
            // The store rejected this outright; `Validation` is the non-retryable
            // kind that fits (spec.md §7 "never enqueued"). `Fatal` names a
            // distinct failure mode (backend unavailable, no fallback) and isn't
            // what a store-level permanent rejection is.
            crate::error::CoreError::Validation(e.message)
        }
    }
}

/// A page of messages, as returned by `find_by_conversation`.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

/// Pagination request for `find_by_conversation`.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub cursor: Option<String>,
    pub page: Option<u32>,
    pub limit: u32,
    pub user_id: UserId,
}

/// Which messages an `update_message_status` call targets.
#[derive(Debug, Clone)]
pub enum MessageSelector {
    All,
    Ids(Vec<MessageId>),
}

/// Result of a bulk status update.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifiedCount {
    pub modified_count: u64,
}

/// Result of a single-message status update.
#[derive(Debug, Clone)]
pub struct SingleUpdateResult {
    pub modified_count: u64,
    pub message: Option<Message>,
}

/// The durable store `MessagePipeline` saves accepted messages to and reads
/// them back from (spec.md §6 "To the primary store (required)").
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Persist `msg`, assigning an id if it doesn't already have one, or
    /// preserving its id if it does (fallback replay, spec.md §4.6).
    async fn save(&self, msg: Message) -> Result<Message, StoreError>;

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, StoreError>;

    async fn find_by_conversation(
        &self,
        conversation_id: &ConversationId,
        request: PageRequest,
    ) -> Result<MessagePage, StoreError>;

    async fn update_message_status(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        status: MessageStatus,
        selector: MessageSelector,
    ) -> Result<ModifiedCount, StoreError>;

    async fn update_single_message_status(
        &self,
        message_id: &MessageId,
        user_id: &UserId,
        status: MessageStatus,
    ) -> Result<SingleUpdateResult, StoreError>;

    async fn count_unread_messages(&self, conversation_id: &ConversationId, user_id: &UserId) -> Result<u64, StoreError>;

    async fn count_all_unread_messages(&self, user_id: &UserId) -> Result<u64, StoreError>;

    /// Returns the conversation id the deleted message belonged to, so
    /// callers (and the cache invalidation path) can target it without a
    /// second read.
    async fn delete_by_id(&self, id: &MessageId) -> Result<ConversationId, StoreError>;
}

/// The conversation-metadata side of the durable backend — participants,
/// titles, settings — consulted by the router when deriving `receiver_id`
/// (spec.md §4.7) and by `RoomRegistry`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_by_id(&self, id: &ConversationId) -> Result<Option<crate::message::ConversationRef>, StoreError>;
}

#[cfg(test)]
pub mod fakes {
    //! An in-memory `PrimaryStore` double for this crate's own integration
    //! tests — not part of the public API.
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryStore {
        messages: Mutex<HashMap<String, Message>>,
        next_id: AtomicU64,
        pub fail_next_saves: std::sync::atomic::AtomicU32,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `n` `save` calls fail with a transient error, then
        /// succeed — used to drive the retry/fallback scenarios in spec.md §8.
        pub fn fail_next(&self, n: u32) {
            self.fail_next_saves.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PrimaryStore for InMemoryStore {
        async fn save(&self, mut msg: Message) -> Result<Message, StoreError> {
            let remaining = self.fail_next_saves.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next_saves.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::transient("simulated store outage"));
            }
            let id = match &msg.id {
                Some(id) => id.clone(),
                None => {
                    let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                    crate::ids::MessageId::new(format!("m{}", n))
                }
            };
            msg.id = Some(id.clone());
            self.messages.lock().unwrap().insert(id.as_str().to_string(), msg.clone());
            Ok(msg)
        }

        async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
            Ok(self.messages.lock().unwrap().get(id.as_str()).cloned())
        }

        async fn find_by_conversation(
            &self,
            conversation_id: &ConversationId,
            request: PageRequest,
        ) -> Result<MessagePage, StoreError> {
            let messages: Vec<Message> = self
                .messages
                .lock()
                .unwrap()
                .values()
                .filter(|m| &m.conversation_id == conversation_id)
                .take(request.limit as usize)
                .cloned()
                .collect();
            Ok(MessagePage { messages, next_cursor: None })
        }

        async fn update_message_status(
            &self,
            conversation_id: &ConversationId,
            _user_id: &UserId,
            status: MessageStatus,
            selector: MessageSelector,
        ) -> Result<ModifiedCount, StoreError> {
            let mut modified = 0u64;
            let mut guard = self.messages.lock().unwrap();
            for m in guard.values_mut() {
                if &m.conversation_id != conversation_id {
                    continue;
                }
                let matches = match &selector {
                    MessageSelector::All => true,
                    MessageSelector::Ids(ids) => m.id.as_ref().map(|id| ids.contains(id)).unwrap_or(false),
                };
                if matches {
                    m.status = status;
                    modified += 1;
                }
            }
            Ok(ModifiedCount { modified_count: modified })
        }

        async fn update_single_message_status(
            &self,
            message_id: &MessageId,
            _user_id: &UserId,
            status: MessageStatus,
        ) -> Result<SingleUpdateResult, StoreError> {
            let mut guard = self.messages.lock().unwrap();
            if let Some(m) = guard.get_mut(message_id.as_str()) {
                m.status = status;
                Ok(SingleUpdateResult { modified_count: 1, message: Some(m.clone()) })
            } else {
                Ok(SingleUpdateResult { modified_count: 0, message: None })
            }
        }

        async fn count_unread_messages(&self, conversation_id: &ConversationId, _user_id: &UserId) -> Result<u64, StoreError> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .values()
                .filter(|m| &m.conversation_id == conversation_id && m.status != MessageStatus::Read)
                .count() as u64)
        }

        async fn count_all_unread_messages(&self, _user_id: &UserId) -> Result<u64, StoreError> {
            Ok(self.messages.lock().unwrap().values().filter(|m| m.status != MessageStatus::Read).count() as u64)
        }

        async fn delete_by_id(&self, id: &MessageId) -> Result<ConversationId, StoreError> {
            let mut guard = self.messages.lock().unwrap();
            match guard.remove(id.as_str()) {
                Some(m) => Ok(m.conversation_id),
                None => Err(StoreError::permanent("not found")),
            }
        }
    }

    #[tokio::test]
    async fn save_assigns_id_when_absent() {
        let store = InMemoryStore::new();
        let msg = Message::new(ConversationId::new("c1"), UserId::new("u1"), "hi", crate::message::MessageType::Text);
        let saved = store.save(msg).await.unwrap();
        assert!(saved.id.is_some());
    }

    #[tokio::test]
    async fn save_preserves_existing_id() {
        let store = InMemoryStore::new();
        let mut msg = Message::new(ConversationId::new("c1"), UserId::new("u1"), "hi", crate::message::MessageType::Text);
        msg.id = Some(MessageId::new("preset"));
        let saved = store.save(msg).await.unwrap();
        assert_eq!(saved.id, Some(MessageId::new("preset")));
    }

    #[tokio::test]
    async fn fail_next_causes_transient_failures_then_recovers() {
        let store = InMemoryStore::new();
        store.fail_next(2);
        let msg = || Message::new(ConversationId::new("c1"), UserId::new("u1"), "hi", crate::message::MessageType::Text);
        assert!(store.save(msg()).await.is_err());
        assert!(store.save(msg()).await.is_err());
        assert!(store.save(msg()).await.is_ok());
    }
}
