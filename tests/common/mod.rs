//! Shared scaffolding for the integration tests: a disposable Redis
//! connection plus in-memory `PrimaryStore`/`ConversationStore` fakes.
//!
//! These tests need a real Redis reachable at `REDIS_URL` (default
//! `redis://127.0.0.1:6379`) since `StreamBus`, `FallbackStore`,
//! `PresenceRegistry`, and `RoomRegistry` all talk to it directly. When
//! nothing is listening, `connect()` returns `None` and the calling test
//! prints a notice and returns early instead of failing.

use async_trait::async_trait;
use chat_messaging_core::{
    ConversationRef, ConversationStore, Message, MessageId, MessagePage, MessageSelector,
    MessageStatus, ModifiedCount, PageRequest, PrimaryStore, SingleUpdateResult, StoreError,
};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Connect and flush the target database so each test starts from empty
/// streams/keys. Returns `None` (rather than panicking) when Redis isn't
/// reachable, so these tests skip gracefully in environments without it.
pub async fn connect() -> Option<ConnectionManager> {
    let client = redis::Client::open(redis_url()).ok()?;
    let mut conn = ConnectionManager::new(client).await.ok()?;
    let _: Result<(), _> = redis::cmd("FLUSHDB").query_async(&mut conn).await;
    Some(conn)
}

macro_rules! require_redis {
    () => {
        match crate::common::connect().await {
            Some(conn) => conn,
            None => {
                eprintln!("skipping: no Redis reachable at {}", crate::common::redis_url());
                return;
            }
        }
    };
}
pub(crate) use require_redis;

/// In-memory `PrimaryStore` double, independent of the crate's own
/// unit-test-only fake, so it links into external test binaries.
#[derive(Default)]
pub struct InMemoryStore {
    messages: Mutex<HashMap<String, Message>>,
    next_id: AtomicU64,
    fail_next_saves: AtomicU32,
    always_fail: std::sync::atomic::AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `save` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next_saves.store(n, Ordering::SeqCst);
    }

    /// Make every `save` call fail with a transient error until cleared.
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl PrimaryStore for InMemoryStore {
    async fn save(&self, mut msg: Message) -> Result<Message, StoreError> {
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(StoreError::transient("simulated permanent store outage"));
        }
        let remaining = self.fail_next_saves.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_saves.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::transient("simulated store outage"));
        }
        let id = match &msg.id {
            Some(id) => id.clone(),
            None => MessageId::new(format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst))),
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
        conversation_id: &chat_messaging_core::ConversationId,
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
        conversation_id: &chat_messaging_core::ConversationId,
        _user_id: &chat_messaging_core::UserId,
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
        _user_id: &chat_messaging_core::UserId,
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

    async fn count_unread_messages(
        &self,
        conversation_id: &chat_messaging_core::ConversationId,
        _user_id: &chat_messaging_core::UserId,
    ) -> Result<u64, StoreError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|m| &m.conversation_id == conversation_id && m.status != MessageStatus::Read)
            .count() as u64)
    }

    async fn count_all_unread_messages(&self, _user_id: &chat_messaging_core::UserId) -> Result<u64, StoreError> {
        Ok(self.messages.lock().unwrap().values().filter(|m| m.status != MessageStatus::Read).count() as u64)
    }

    async fn delete_by_id(&self, id: &MessageId) -> Result<chat_messaging_core::ConversationId, StoreError> {
        let mut guard = self.messages.lock().unwrap();
        match guard.remove(id.as_str()) {
            Some(m) => Ok(m.conversation_id),
            None => Err(StoreError::permanent("not found")),
        }
    }
}

/// Fixed-membership `ConversationStore` double: one conversation, callers
/// set its participants up front.
pub struct FixedConversationStore {
    conversation: ConversationRef,
}

impl FixedConversationStore {
    pub fn new(conversation: ConversationRef) -> Self {
        Self { conversation }
    }
}

#[async_trait]
impl ConversationStore for FixedConversationStore {
    async fn find_by_id(
        &self,
        id: &chat_messaging_core::ConversationId,
    ) -> Result<Option<ConversationRef>, StoreError> {
        if &self.conversation.id == id {
            Ok(Some(self.conversation.clone()))
        } else {
            Ok(None)
        }
    }
}

/// Assemble a `MessagePipeline` over the given store with every recovery
/// component wired to `conn`/`bus`, spec.md defaults throughout except for
/// `wal_timeout_ms`, which tests shrink so WAL-recovery scenarios don't have
/// to wait out the real 60s default.
pub fn build_pipeline(
    conn: ConnectionManager,
    store: std::sync::Arc<dyn PrimaryStore>,
    max_retries: u32,
    wal_timeout_ms: u64,
) -> std::sync::Arc<chat_messaging_core::MessagePipeline> {
    use chat_messaging_core::*;
    use std::time::Duration;

    let bus = StreamBus::new(conn.clone());
    let limits = StreamLimits::default();

    std::sync::Arc::new(
        MessagePipeline::builder()
            .primary_store(store)
            .breaker(CircuitBreakerPolicy::new(5, Duration::from_secs(30)))
            .wal(Wal::new(bus.clone(), 10_000, wal_timeout_ms))
            .retry_scheduler(RetryScheduler::new(bus.clone(), 5_000, max_retries))
            .fallback_store(FallbackStore::new(conn.clone(), bus.clone(), 5_000, 24 * 3600))
            .dlq(Dlq::new(bus.clone(), 1_000))
            .router(MultiStreamRouter::new(bus, limits))
            .build()
            .expect("every required component was provided"),
    )
}
