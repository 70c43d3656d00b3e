//! Redis-hash parking lot for messages the primary store couldn't accept
//! directly (spec.md §4.3). A fallback entry lives until a `FallbackWorker`
//! replays it into the primary store or routes it to the DLQ; TTL expiry
//! alone never performs that transition.

use crate::error::CoreError;
use crate::ids::{ConversationId, FallbackId, MessageId, UserId};
use crate::message::{Message, MessageStatus};
use crate::stream_bus::StreamBus;
use crate::time::epoch_millis;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;

pub const FALLBACK_STREAM: &str = "fallback:stream";
pub const FALLBACK_ACTIVE_SET: &str = "fallback:active";
pub const FALLBACK_STATS_HASH: &str = "fallback:stats";

pub const DEFAULT_FALLBACK_TTL_SECS: u64 = 24 * 3600;

fn fallback_key(id: &FallbackId) -> String {
    format!("fallback:{}", id.as_str())
}

/// A parked message, as stored under `fallback:<id>`.
#[derive(Debug, Clone)]
pub struct FallbackEntry {
    pub id: FallbackId,
    pub original_id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub message_type: String,
    pub subtype: Option<String>,
    pub status: MessageStatus,
    pub created_at_ms: u64,
    pub parked_at_ms: u64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

pub struct FallbackStore {
    conn: ConnectionManager,
    bus: StreamBus,
    stream_maxlen: u64,
    ttl_secs: u64,
}

fn map_redis_err(e: redis::RedisError) -> CoreError {
    CoreError::StreamUnavailable(e.to_string())
}

impl FallbackStore {
    pub fn new(conn: ConnectionManager, bus: StreamBus, stream_maxlen: u64, ttl_secs: u64) -> Self {
        Self { conn, bus, stream_maxlen, ttl_secs }
    }

    /// Park `msg`, appending a replay-needed stream entry and indexing it in
    /// the active sorted set (score = now).
    pub async fn park(&self, msg: &Message) -> Result<FallbackId, CoreError> {
        let now = epoch_millis();
        let id = FallbackId::generate(now);
        let key = fallback_key(&id);

        let mut hash: HashMap<&str, String> = HashMap::new();
        hash.insert("id", id.as_str().to_string());
        hash.insert("original_id", msg.id.as_ref().map(|m| m.as_str().to_string()).unwrap_or_else(|| "pending".to_string()));
        hash.insert("conversation_id", msg.conversation_id.as_str().to_string());
        hash.insert("sender_id", msg.sender_id.as_str().to_string());
        hash.insert("receiver_id", msg.receiver_id.as_ref().map(|r| r.as_str().to_string()).unwrap_or_default());
        hash.insert("content", msg.content.clone());
        hash.insert("type", format!("{:?}", msg.message_type).to_uppercase());
        hash.insert("subtype", msg.subtype.clone().unwrap_or_default());
        hash.insert("status", "pending_fallback".to_string());
        hash.insert("created_at", msg.created_at.timestamp_millis().to_string());
        hash.insert("ts", now.to_string());
        hash.insert("metadata", serde_json::to_string(&msg.metadata).unwrap_or_default());

        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(&key, &hash.into_iter().collect::<Vec<_>>()).await.map_err(map_redis_err)?;
        let _: () = conn.expire(&key, self.ttl_secs as i64).await.map_err(map_redis_err)?;
        let _: () = conn.zadd(FALLBACK_ACTIVE_SET, id.as_str(), now as f64).await.map_err(map_redis_err)?;

        let mut fields = HashMap::new();
        fields.insert("fallback_id".to_string(), id.as_str().to_string());
        fields.insert("conversation_id".to_string(), msg.conversation_id.as_str().to_string());
        self.bus.append(FALLBACK_STREAM, &fields, self.stream_maxlen).await?;

        let mut conn = self.conn.clone();
        let _: () = conn.hincr(FALLBACK_STATS_HASH, "total", 1i64).await.map_err(map_redis_err)?;
        let _: () = conn.hincr(FALLBACK_STATS_HASH, "active", 1i64).await.map_err(map_redis_err)?;

        Ok(id)
    }

    pub async fn fetch(&self, id: &FallbackId) -> Result<Option<FallbackEntry>, CoreError> {
        let key = fallback_key(id);
        let mut conn = self.conn.clone();
        let hash: HashMap<String, String> = conn.hgetall(&key).await.map_err(map_redis_err)?;
        if hash.is_empty() {
            return Ok(None);
        }
        let original_id = hash.get("original_id").filter(|s| s.as_str() != "pending").map(|s| MessageId::new(s.clone()));
        let receiver_id = hash.get("receiver_id").filter(|s| !s.is_empty()).map(|s| UserId::new(s.clone()));
        let subtype = hash.get("subtype").filter(|s| !s.is_empty()).cloned();
        let metadata = hash
            .get("metadata")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        Ok(Some(FallbackEntry {
            id: id.clone(),
            original_id,
            conversation_id: ConversationId::new(hash.get("conversation_id").cloned().unwrap_or_default()),
            sender_id: UserId::new(hash.get("sender_id").cloned().unwrap_or_default()),
            receiver_id,
            content: hash.get("content").cloned().unwrap_or_default(),
            message_type: hash.get("type").cloned().unwrap_or_default(),
            subtype,
            status: MessageStatus::PendingFallback,
            created_at_ms: hash.get("created_at").and_then(|s| s.parse().ok()).unwrap_or(0),
            parked_at_ms: hash.get("ts").and_then(|s| s.parse().ok()).unwrap_or(0),
            metadata,
        }))
    }

    /// Remove the parked hash and its entry in the active set. Does not
    /// touch the stream entry — the worker calling this owns deleting that
    /// separately once it has consumed it.
    pub async fn drop_entry(&self, id: &FallbackId) -> Result<(), CoreError> {
        let key = fallback_key(id);
        let mut conn = self.conn.clone();
        let _: () = conn.del(&key).await.map_err(map_redis_err)?;
        let _: () = conn.zrem(FALLBACK_ACTIVE_SET, id.as_str()).await.map_err(map_redis_err)?;
        let _: () = conn.hincr(FALLBACK_STATS_HASH, "active", -1i64).await.map_err(map_redis_err)?;
        Ok(())
    }

    pub async fn mark_replayed(&self, id: &FallbackId) -> Result<(), CoreError> {
        self.drop_entry(id).await?;
        let mut conn = self.conn.clone();
        let _: () = conn.hincr(FALLBACK_STATS_HASH, "replayed", 1i64).await.map_err(map_redis_err)?;
        Ok(())
    }

    /// Read up to `limit` replay-needed entries off the fallback stream,
    /// returning each entry's stream id paired with the fallback id it
    /// names. Used by `FallbackWorker` to drive replay.
    pub async fn recent_stream_entries(&self, limit: usize) -> Result<Vec<(String, FallbackId)>, CoreError> {
        let raw = self.bus.read_range(FALLBACK_STREAM, "-", "+", limit).await?;
        Ok(raw.into_iter().filter_map(|entry| entry.fields.get("fallback_id").map(|fid| (entry.id, FallbackId::new(fid.clone())))).collect())
    }

    /// Delete a consumed replay-needed entry off the fallback stream.
    pub async fn ack_stream_entry(&self, entry_id: &str) -> Result<(), CoreError> {
        self.bus.delete(FALLBACK_STREAM, entry_id).await
    }

    pub async fn counters(&self) -> Result<FallbackCounters, CoreError> {
        let mut conn = self.conn.clone();
        let hash: HashMap<String, i64> = conn.hgetall(FALLBACK_STATS_HASH).await.map_err(map_redis_err)?;
        Ok(FallbackCounters {
            total: *hash.get("total").unwrap_or(&0) as u64,
            active: (*hash.get("active").unwrap_or(&0)).max(0) as u64,
            replayed: *hash.get("replayed").unwrap_or(&0) as u64,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackCounters {
    pub total: u64,
    pub active: u64,
    pub replayed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_key_shape() {
        let id = FallbackId::generate(1234);
        assert!(fallback_key(&id).starts_with("fallback:fb_1234_"));
    }
}
