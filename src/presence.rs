//! Online-user presence: a set plus a per-user TTL-bounded hash, driven to
//! offline either explicitly or by the backend's key-expiration
//! notifications (spec.md §4.9).

use crate::error::CoreError;
use crate::ids::UserId;
use crate::time::epoch_millis;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

pub const ONLINE_USERS_SET: &str = "online_users";

fn user_data_key(user_id: &UserId) -> String {
    format!("user_data:{}", user_id.as_str())
}

fn user_socket_key(socket_id: &str) -> String {
    format!("user_sockets:{}", socket_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Idle,
    Offline,
}

#[derive(Debug, Clone)]
pub struct PresenceData {
    pub socket_id: Option<String>,
    pub server_id: String,
    pub connected_at_ms: u64,
    pub last_activity_ms: u64,
    pub matricule: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub data: PresenceData,
    pub status: PresenceStatus,
}

fn map_redis_err(e: redis::RedisError) -> CoreError {
    CoreError::StreamUnavailable(e.to_string())
}

pub struct PresenceRegistry {
    conn: ConnectionManager,
    ttl: Duration,
    inactive_threshold: Duration,
}

impl PresenceRegistry {
    pub fn new(conn: ConnectionManager, ttl: Duration, inactive_threshold: Duration) -> Self {
        Self { conn, ttl, inactive_threshold }
    }

    pub async fn set_online(&self, user_id: &UserId, data: PresenceData) -> Result<(), CoreError> {
        let key = user_data_key(user_id);
        let mut hash: HashMap<&str, String> = HashMap::new();
        hash.insert("socket_id", data.socket_id.clone().unwrap_or_default());
        hash.insert("server_id", data.server_id.clone());
        hash.insert("connected_at", data.connected_at_ms.to_string());
        hash.insert("last_activity", data.last_activity_ms.to_string());
        hash.insert("matricule", data.matricule.clone().unwrap_or_default());

        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(&key, &hash.into_iter().collect::<Vec<_>>()).await.map_err(map_redis_err)?;
        let _: () = conn.expire(&key, self.ttl.as_secs() as i64).await.map_err(map_redis_err)?;
        let _: () = conn.sadd(ONLINE_USERS_SET, user_id.as_str()).await.map_err(map_redis_err)?;

        if let Some(socket_id) = &data.socket_id {
            let socket_key = user_socket_key(socket_id);
            let _: () = conn.set_ex(&socket_key, user_id.as_str(), self.ttl.as_secs()).await.map_err(map_redis_err)?;
        }
        Ok(())
    }

    pub async fn set_offline(&self, user_id: &UserId) -> Result<(), CoreError> {
        let key = user_data_key(user_id);
        let mut conn = self.conn.clone();
        let socket_id: Option<String> = conn.hget(&key, "socket_id").await.ok().flatten();
        let _: () = conn.del(&key).await.map_err(map_redis_err)?;
        let _: () = conn.srem(ONLINE_USERS_SET, user_id.as_str()).await.map_err(map_redis_err)?;
        if let Some(socket_id) = socket_id.filter(|s| !s.is_empty()) {
            let _: () = conn.del(&user_socket_key(&socket_id)).await.map_err(map_redis_err)?;
        }
        Ok(())
    }

    /// Update `last_activity` and renew the hash's TTL.
    pub async fn touch(&self, user_id: &UserId) -> Result<(), CoreError> {
        let key = user_data_key(user_id);
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(&key).await.map_err(map_redis_err)?;
        if !exists {
            return Ok(());
        }
        let _: () = conn.hset(&key, "last_activity", epoch_millis().to_string()).await.map_err(map_redis_err)?;
        let _: () = conn.expire(&key, self.ttl.as_secs() as i64).await.map_err(map_redis_err)?;
        Ok(())
    }

    /// Called by the key-expiration listener once `user_data:<id>` expires:
    /// transition to offline by removing the user from the online set (the
    /// hash is already gone).
    pub async fn handle_expired_user(&self, user_id: &UserId) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        conn.srem(ONLINE_USERS_SET, user_id.as_str()).await.map_err(map_redis_err)
    }

    pub async fn get(&self, user_id: &UserId) -> Result<Option<PresenceRecord>, CoreError> {
        let key = user_data_key(user_id);
        let mut conn = self.conn.clone();
        let hash: HashMap<String, String> = conn.hgetall(&key).await.map_err(map_redis_err)?;
        if hash.is_empty() {
            return Ok(None);
        }
        let last_activity_ms: u64 = hash.get("last_activity").and_then(|s| s.parse().ok()).unwrap_or(0);
        let now = epoch_millis();
        let status = if now.saturating_sub(last_activity_ms) > self.inactive_threshold.as_millis() as u64 {
            PresenceStatus::Idle
        } else {
            PresenceStatus::Online
        };
        Ok(Some(PresenceRecord {
            user_id: user_id.clone(),
            data: PresenceData {
                socket_id: hash.get("socket_id").filter(|s| !s.is_empty()).cloned(),
                server_id: hash.get("server_id").cloned().unwrap_or_default(),
                connected_at_ms: hash.get("connected_at").and_then(|s| s.parse().ok()).unwrap_or(0),
                last_activity_ms,
                matricule: hash.get("matricule").filter(|s| !s.is_empty()).cloned(),
            },
            status,
        }))
    }

    /// Sweep users whose `last_activity` is older than the inactive
    /// threshold, setting them offline.
    pub async fn cleanup_inactive(&self) -> Result<u64, CoreError> {
        let mut conn = self.conn.clone();
        let online: Vec<String> = conn.smembers(ONLINE_USERS_SET).await.map_err(map_redis_err)?;
        let now = epoch_millis();
        let mut cleaned = 0u64;
        for user_id in online {
            let user_id = UserId::new(user_id);
            if let Some(record) = self.get(&user_id).await? {
                if now.saturating_sub(record.data.last_activity_ms) > self.inactive_threshold.as_millis() as u64 {
                    self.set_offline(&user_id).await?;
                    cleaned += 1;
                }
            } else {
                self.handle_expired_user(&user_id).await?;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_data_key_shape() {
        assert_eq!(user_data_key(&UserId::new("u1")), "user_data:u1");
    }

    #[test]
    fn user_socket_key_shape() {
        assert_eq!(user_socket_key("s1"), "user_sockets:s1");
    }
}
