//! Read-through cache for conversation message pages, plus unread counters
//! (spec.md §4.11).

use crate::error::CoreError;
use crate::ids::{ConversationId, UserId};
use crate::message::Message;
use crate::store::{PageRequest, PrimaryStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

/// Which TTL tier a read falls under (spec.md §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// First page of a conversation.
    Default,
    /// Subsequent pages and cursor pages.
    Short,
    /// Last-N preload.
    Quick,
}

fn cache_key(conversation_id: &ConversationId, selector: &str, limit: u32) -> String {
    format!("msgs:{}:{}:{}", conversation_id.as_str(), selector, limit)
}

fn quick_cache_key(conversation_id: &ConversationId, limit: u32) -> String {
    format!("msgs:quick:{}:{}", conversation_id.as_str(), limit)
}

fn last_messages_key(conversation_id: &ConversationId) -> String {
    format!("last_messages:{}", conversation_id.as_str())
}

fn unread_user_key(user_id: &UserId, conversation_id: &ConversationId) -> String {
    format!("unread:user:{}:{}", user_id.as_str(), conversation_id.as_str())
}

fn unread_conv_key(conversation_id: &ConversationId, user_id: &UserId) -> String {
    format!("unread:conv:{}:{}", conversation_id.as_str(), user_id.as_str())
}

fn map_redis_err(e: redis::RedisError) -> CoreError {
    CoreError::StreamUnavailable(e.to_string())
}

pub struct CacheTtls {
    pub default_page: Duration,
    pub subsequent_page: Duration,
    pub last_n_preload: Duration,
}

pub struct CachedMessageView {
    conn: ConnectionManager,
    store: Arc<dyn PrimaryStore>,
    ttls: CacheTtls,
    unread_ttl: Duration,
}

impl CachedMessageView {
    pub fn new(conn: ConnectionManager, store: Arc<dyn PrimaryStore>, ttls: CacheTtls, unread_ttl: Duration) -> Self {
        Self { conn, store, ttls, unread_ttl }
    }

    /// Read a conversation page: on hit, renew the TTL (sliding); on miss,
    /// read through to the store and write back.
    pub async fn read_page(
        &self,
        conversation_id: &ConversationId,
        request: PageRequest,
        tier: CacheTier,
    ) -> Result<Vec<Message>, CoreError> {
        let selector = request.cursor.clone().unwrap_or_else(|| request.page.map(|p| p.to_string()).unwrap_or_else(|| "first".into()));
        let key = if tier == CacheTier::Quick {
            quick_cache_key(conversation_id, request.limit)
        } else {
            cache_key(conversation_id, &selector, request.limit)
        };
        let ttl = match tier {
            CacheTier::Default => self.ttls.default_page,
            CacheTier::Short => self.ttls.subsequent_page,
            CacheTier::Quick => self.ttls.last_n_preload,
        };

        let mut conn = self.conn.clone();
        let cached: Option<String> = conn.get(&key).await.map_err(map_redis_err)?;
        if let Some(json) = cached {
            let _: () = conn.expire(&key, ttl.as_secs() as i64).await.map_err(map_redis_err)?;
            if let Ok(messages) = serde_json::from_str::<Vec<Message>>(&json) {
                return Ok(messages);
            }
        }

        let page = self.store.find_by_conversation(conversation_id, request).await?;
        let json = serde_json::to_string(&page.messages).unwrap_or_default();
        let _: () = conn.set_ex(&key, json, ttl.as_secs()).await.map_err(map_redis_err)?;
        Ok(page.messages)
    }

    /// On `save`: increment the receiver's unread counter, then invalidate
    /// this conversation's page caches (but not conversation-level caches
    /// owned by a different component) and schedule a last-N preload.
    pub async fn on_save(&self, msg: &Message) -> Result<(), CoreError> {
        if let Some(receiver_id) = &msg.receiver_id {
            self.increment_unread(&msg.conversation_id, receiver_id).await?;
        }
        self.invalidate(&msg.conversation_id).await?;
        self.preload_last_n(&msg.conversation_id, 50).await.ok();
        Ok(())
    }

    async fn invalidate(&self, conversation_id: &ConversationId) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        for pattern in [format!("msgs:{}:*", conversation_id.as_str()), format!("msgs:quick:{}:*", conversation_id.as_str())] {
            let keys: Vec<String> = conn.keys(&pattern).await.map_err(map_redis_err)?;
            if !keys.is_empty() {
                let _: () = conn.del(&keys).await.map_err(map_redis_err)?;
            }
        }
        let _: () = conn.del(last_messages_key(conversation_id)).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn preload_last_n(&self, conversation_id: &ConversationId, n: u32) -> Result<(), CoreError> {
        let request = PageRequest { cursor: None, page: Some(1), limit: n, user_id: UserId::new("") };
        let page = self.store.find_by_conversation(conversation_id, request).await?;
        let json = serde_json::to_string(&page.messages).unwrap_or_default();
        let mut conn = self.conn.clone();
        let _: () =
            conn.set_ex(last_messages_key(conversation_id), json, self.ttls.last_n_preload.as_secs()).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn increment_unread(&self, conversation_id: &ConversationId, user_id: &UserId) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let user_key = unread_user_key(user_id, conversation_id);
        let conv_key = unread_conv_key(conversation_id, user_id);
        let _: () = conn.incr(&user_key, 1).await.map_err(map_redis_err)?;
        let _: () = conn.expire(&user_key, self.unread_ttl.as_secs() as i64).await.map_err(map_redis_err)?;
        let _: () = conn.incr(&conv_key, 1).await.map_err(map_redis_err)?;
        let _: () = conn.expire(&conv_key, self.unread_ttl.as_secs() as i64).await.map_err(map_redis_err)?;
        Ok(())
    }

    /// On cache miss, recompute from the store and write back only if
    /// non-zero (spec.md §3 `UnreadCounter`).
    pub async fn unread_count(&self, conversation_id: &ConversationId, user_id: &UserId) -> Result<u64, CoreError> {
        let key = unread_user_key(user_id, conversation_id);
        let mut conn = self.conn.clone();
        if let Some(cached) = conn.get::<_, Option<u64>>(&key).await.map_err(map_redis_err)? {
            return Ok(cached);
        }
        let count = self.store.count_unread_messages(conversation_id, user_id).await?;
        if count > 0 {
            let _: () = conn.set_ex(&key, count, self.unread_ttl.as_secs()).await.map_err(map_redis_err)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_shape() {
        assert_eq!(cache_key(&ConversationId::new("c1"), "p1", 20), "msgs:c1:p1:20");
    }

    #[test]
    fn unread_key_shapes() {
        assert_eq!(unread_user_key(&UserId::new("u1"), &ConversationId::new("c1")), "unread:user:u1:c1");
        assert_eq!(unread_conv_key(&ConversationId::new("c1"), &UserId::new("u1")), "unread:conv:c1:u1");
    }
}
