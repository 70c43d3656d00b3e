//! Room membership and its TTL-driven lifecycle state machine
//! (spec.md §4.10).

use crate::error::CoreError;
use crate::ids::UserId;
use crate::presence::{PresenceRegistry, PresenceStatus};
use crate::time::epoch_millis;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Active,
    Idle,
    Archived,
    Deleted,
}

impl RoomState {
    fn as_str(self) -> &'static str {
        match self {
            RoomState::Active => "active",
            RoomState::Idle => "idle",
            RoomState::Archived => "archived",
            RoomState::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomHealth {
    Healthy,
    Moderate,
    Low,
    Empty,
}

/// A member's role within a room, used to weight `get_room_presence_stats`'
/// engagement score (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomRole {
    Member,
    Moderator,
    Owner,
}

impl RoomRole {
    fn as_str(self) -> &'static str {
        match self {
            RoomRole::Member => "member",
            RoomRole::Moderator => "moderator",
            RoomRole::Owner => "owner",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "moderator" => RoomRole::Moderator,
            "owner" => RoomRole::Owner,
            _ => RoomRole::Member,
        }
    }

    /// Contribution to the engagement score, normalized 0.0..=1.0.
    fn weight(self) -> f64 {
        match self {
            RoomRole::Member => 0.0,
            RoomRole::Moderator => 0.5,
            RoomRole::Owner => 1.0,
        }
    }
}

/// Conversation-level data held in `room_metadata:<name>` (spec.md §3 Room).
#[derive(Debug, Clone, Default)]
pub struct RoomMetadata {
    pub title: Option<String>,
    pub participants_count: u64,
    pub settings: Map<String, Value>,
    pub unread_counts: HashMap<String, u64>,
}

fn room_users_key(room: &str) -> String {
    format!("room_users:{}", room)
}

fn user_rooms_key(user_id: &UserId) -> String {
    format!("user_rooms:{}", user_id.as_str())
}

fn room_data_key(room: &str, user_id: &UserId) -> String {
    format!("room_data:{}:{}", room, user_id.as_str())
}

fn room_state_key(room: &str) -> String {
    format!("room_state:{}", room)
}

fn room_roles_key(room: &str) -> String {
    format!("room_roles:{}", room)
}

fn room_peak_key(room: &str) -> String {
    format!("room_peak:{}", room)
}

fn room_metadata_key(room: &str) -> String {
    format!("room_metadata:{}", room)
}

fn map_redis_err(e: redis::RedisError) -> CoreError {
    CoreError::StreamUnavailable(e.to_string())
}

pub struct RoomRegistry {
    conn: ConnectionManager,
    active_ttl: Duration,
    idle_ttl: Duration,
    archived_ttl: Duration,
}

impl RoomRegistry {
    pub fn new(conn: ConnectionManager, active_ttl: Duration, idle_ttl: Duration, archived_ttl: Duration) -> Self {
        Self { conn, active_ttl, idle_ttl, archived_ttl }
    }

    /// (Re)set the room's state key to `active` with its TTL, the shared
    /// path every `addUser`/`updateActivity` call takes.
    async fn touch_active(&self, room: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(room_state_key(room), RoomState::Active.as_str(), self.active_ttl.as_secs()).await.map_err(map_redis_err)?;
        Ok(())
    }

    pub async fn add_user(&self, room: &str, user_id: &UserId, matricule: Option<&str>, conversation_id: Option<&str>) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(room_users_key(room), user_id.as_str()).await.map_err(map_redis_err)?;
        let _: () = conn.sadd(user_rooms_key(user_id), room).await.map_err(map_redis_err)?;

        let mut hash: HashMap<&str, String> = HashMap::new();
        hash.insert("matricule", matricule.unwrap_or_default().to_string());
        hash.insert("joined_at", epoch_millis().to_string());
        hash.insert("conversation_id", conversation_id.unwrap_or_default().to_string());
        let _: () = conn.hset_multiple(&room_data_key(room, user_id), &hash.into_iter().collect::<Vec<_>>()).await.map_err(map_redis_err)?;

        self.refresh_participants_count(room).await?;
        let member_count: u64 = conn.scard(room_users_key(room)).await.map_err(map_redis_err)?;
        self.bump_peak(room, "members", member_count).await?;

        self.touch_active(room).await
    }

    /// Assign or change `user_id`'s role within `room` (spec.md §3/§4.10
    /// "roles"). Defaults to `RoomRole::Member` when never set.
    pub async fn set_role(&self, room: &str, user_id: &UserId, role: RoomRole) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(&room_roles_key(room), user_id.as_str(), role.as_str()).await.map_err(map_redis_err)?;
        Ok(())
    }

    pub async fn get_role(&self, room: &str, user_id: &UserId) -> Result<RoomRole, CoreError> {
        let mut conn = self.conn.clone();
        let role: Option<String> = conn.hget(&room_roles_key(room), user_id.as_str()).await.map_err(map_redis_err)?;
        Ok(role.as_deref().map(RoomRole::from_str).unwrap_or(RoomRole::Member))
    }

    /// Write the conversation-level fields of `room_metadata:<name>`
    /// (spec.md §3 Room: "title, participants count, unreadCounts map,
    /// settings"). `participants_count` is recomputed from membership
    /// rather than taken from the caller, so it can't drift.
    pub async fn set_room_metadata(&self, room: &str, title: Option<&str>, settings: &Map<String, Value>) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let mut hash: HashMap<&str, String> = HashMap::new();
        hash.insert("title", title.unwrap_or_default().to_string());
        hash.insert("settings", serde_json::to_string(settings).unwrap_or_default());
        let _: () = conn.hset_multiple(&room_metadata_key(room), &hash.into_iter().collect::<Vec<_>>()).await.map_err(map_redis_err)?;
        self.refresh_participants_count(room).await
    }

    /// Set the cached unread count for `user_id` in `room`'s metadata hash.
    pub async fn set_unread_count(&self, room: &str, user_id: &UserId, count: u64) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(&room_metadata_key(room), format!("unread:{}", user_id.as_str()), count).await.map_err(map_redis_err)?;
        Ok(())
    }

    pub async fn get_room_metadata(&self, room: &str) -> Result<Option<RoomMetadata>, CoreError> {
        let mut conn = self.conn.clone();
        let hash: HashMap<String, String> = conn.hgetall(&room_metadata_key(room)).await.map_err(map_redis_err)?;
        if hash.is_empty() {
            return Ok(None);
        }
        let mut unread_counts = HashMap::new();
        for (field, value) in &hash {
            if let Some(user_id) = field.strip_prefix("unread:") {
                if let Ok(count) = value.parse() {
                    unread_counts.insert(user_id.to_string(), count);
                }
            }
        }
        Ok(Some(RoomMetadata {
            title: hash.get("title").filter(|s| !s.is_empty()).cloned(),
            participants_count: hash.get("participants_count").and_then(|s| s.parse().ok()).unwrap_or(0),
            settings: hash.get("settings").and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default(),
            unread_counts,
        }))
    }

    async fn refresh_participants_count(&self, room: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.scard(room_users_key(room)).await.map_err(map_redis_err)?;
        let _: () = conn.hset(&room_metadata_key(room), "participants_count", count.to_string()).await.map_err(map_redis_err)?;
        Ok(())
    }

    /// Record a new high-water mark for `field` (e.g. `"members"`,
    /// `"online"`) in `room_peak:<name>` (spec.md §2 "peaks"), alongside the
    /// timestamp it was reached.
    async fn bump_peak(&self, room: &str, field: &str, value: u64) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let key = room_peak_key(room);
        let current: Option<u64> = conn.hget(&key, field).await.map_err(map_redis_err)?;
        if current.map_or(true, |c| value > c) {
            let _: () = conn.hset(&key, field, value).await.map_err(map_redis_err)?;
            let _: () = conn.hset(&key, format!("{}_at", field), epoch_millis()).await.map_err(map_redis_err)?;
        }
        Ok(())
    }

    pub async fn update_activity(&self, room: &str) -> Result<(), CoreError> {
        self.touch_active(room).await
    }

    /// Remove a user from one room. Force-transitions the room to archived
    /// if it is now empty.
    pub async fn remove_user(&self, room: &str, user_id: &UserId) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(room_users_key(room), user_id.as_str()).await.map_err(map_redis_err)?;
        let _: () = conn.srem(user_rooms_key(user_id), room).await.map_err(map_redis_err)?;
        let _: () = conn.del(room_data_key(room, user_id)).await.map_err(map_redis_err)?;
        let _: () = conn.hdel(room_roles_key(room), user_id.as_str()).await.map_err(map_redis_err)?;

        let remaining: u64 = conn.scard(room_users_key(room)).await.map_err(map_redis_err)?;
        self.refresh_participants_count(room).await?;
        if remaining == 0 {
            self.force_transition(room, RoomState::Archived).await?;
        }
        Ok(())
    }

    pub async fn remove_user_from_all_rooms(&self, user_id: &UserId) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let rooms: Vec<String> = conn.smembers(user_rooms_key(user_id)).await.map_err(map_redis_err)?;
        for room in &rooms {
            self.remove_user(room, user_id).await?;
        }
        let _: () = conn.del(user_rooms_key(user_id)).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn force_transition(&self, room: &str, state: RoomState) -> Result<(), CoreError> {
        let ttl = match state {
            RoomState::Active => self.active_ttl,
            RoomState::Idle => self.idle_ttl,
            RoomState::Archived => self.archived_ttl,
            RoomState::Deleted => Duration::from_secs(0),
        };
        let mut conn = self.conn.clone();
        if state == RoomState::Deleted {
            let _: () = conn.del(room_state_key(room)).await.map_err(map_redis_err)?;
        } else {
            let _: () = conn.set_ex(room_state_key(room), state.as_str(), ttl.as_secs()).await.map_err(map_redis_err)?;
        }
        Ok(())
    }

    /// Advance a room's lifecycle state following its TTL expiration event:
    /// `active → idle → archived → deleted`. Called by the owning worker
    /// when it observes the state key's expiration notification.
    pub async fn handle_state_expired(&self, room: &str, expired_from: RoomState) -> Result<RoomState, CoreError> {
        match expired_from {
            RoomState::Active => {
                self.force_transition(room, RoomState::Idle).await?;
                Ok(RoomState::Idle)
            }
            RoomState::Idle => {
                self.force_transition(room, RoomState::Archived).await?;
                Ok(RoomState::Archived)
            }
            RoomState::Archived => {
                self.delete_room(room).await?;
                Ok(RoomState::Deleted)
            }
            RoomState::Deleted => Ok(RoomState::Deleted),
        }
    }

    async fn delete_room(&self, room: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(room_users_key(room)).await.map_err(map_redis_err)?;
        for member in &members {
            let _: () = conn.del(room_data_key(room, &UserId::new(member.clone()))).await.map_err(map_redis_err)?;
            let _: () = conn.srem(user_rooms_key(&UserId::new(member.clone())), room).await.map_err(map_redis_err)?;
        }
        let _: () = conn.del(room_users_key(room)).await.map_err(map_redis_err)?;
        let _: () = conn.del(room_metadata_key(room)).await.map_err(map_redis_err)?;
        let _: () = conn.del(room_roles_key(room)).await.map_err(map_redis_err)?;
        let _: () = conn.del(room_peak_key(room)).await.map_err(map_redis_err)?;
        let _: () = conn.del(format!("rooms:{}", room)).await.map_err(map_redis_err)?;
        self.force_transition(room, RoomState::Deleted).await
    }

    pub async fn get_room_presence_stats(&self, room: &str, presence: &PresenceRegistry) -> Result<RoomPresenceStats, CoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(room_users_key(room)).await.map_err(map_redis_err)?;
        if members.is_empty() {
            return Ok(RoomPresenceStats {
                total_members: 0,
                online: 0,
                idle: 0,
                offline: 0,
                engagement_score: 0.0,
                health: RoomHealth::Empty,
            });
        }

        let mut online = 0u64;
        let mut idle = 0u64;
        let mut offline = 0u64;
        let now = epoch_millis();
        let mut recent_activity = 0u64;
        let mut role_weight_sum = 0.0;

        for member in &members {
            let user_id = UserId::new(member.clone());
            match presence.get(&user_id).await? {
                Some(record) => {
                    match record.status {
                        PresenceStatus::Online => online += 1,
                        PresenceStatus::Idle => idle += 1,
                        PresenceStatus::Offline => offline += 1,
                    }
                    if now.saturating_sub(record.data.last_activity_ms) < Duration::from_secs(15 * 60).as_millis() as u64 {
                        recent_activity += 1;
                    }
                }
                None => offline += 1,
            }
            role_weight_sum += self.get_role(room, &user_id).await?.weight();
        }

        let total = members.len() as f64;
        let online_ratio = online as f64 / total;
        let active_ratio = recent_activity as f64 / total;

        let health = if online_ratio >= 0.5 && active_ratio >= 0.3 {
            RoomHealth::Healthy
        } else if online_ratio >= 0.2 && active_ratio >= 0.1 {
            RoomHealth::Moderate
        } else {
            RoomHealth::Low
        };

        self.bump_peak(room, "online", online).await?;

        // Weighted sum of online+idle+recent-activity+role, normalized to 0-100.
        let engagement_score =
            ((online as f64 * 1.0 + idle as f64 * 0.5 + recent_activity as f64 * 0.5 + role_weight_sum) / (total * 2.5) * 100.0).min(100.0);

        Ok(RoomPresenceStats { total_members: members.len() as u64, online, idle, offline, engagement_score, health })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RoomPresenceStats {
    pub total_members: u64,
    pub online: u64,
    pub idle: u64,
    pub offline: u64,
    pub engagement_score: f64,
    pub health: RoomHealth,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_users_key_shape() {
        assert_eq!(room_users_key("general"), "room_users:general");
    }

    #[test]
    fn room_state_key_shape() {
        assert_eq!(room_state_key("general"), "room_state:general");
    }
}
