//! The data model: `Message`, `ConversationRef`, and their enums.
//!
//! Field lists and lifecycle invariants follow `spec.md` §3 exactly.

use crate::ids::{ConversationId, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// Message content/media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    System,
}

impl std::str::FromStr for MessageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TEXT" => Ok(MessageType::Text),
            "IMAGE" => Ok(MessageType::Image),
            "VIDEO" => Ok(MessageType::Video),
            "AUDIO" => Ok(MessageType::Audio),
            "DOCUMENT" => Ok(MessageType::Document),
            "SYSTEM" => Ok(MessageType::System),
            _ => Err(()),
        }
    }
}

/// Lifecycle status. Immutable after `Delivered` except for the transitions
/// this enum itself models and content edits (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Edited,
    Deleted,
    PendingFallback,
}

/// Where a published copy of a message came from — carried in stream fields
/// so delivery workers and tests can distinguish the direct path from a
/// recovery path (spec.md §4.6, scenario 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishSource {
    Direct,
    RedisFallback,
    FallbackReplay,
}

impl Default for PublishSource {
    fn default() -> Self {
        PublishSource::Direct
    }
}

impl PublishSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishSource::Direct => "direct",
            PublishSource::RedisFallback => "redis_fallback",
            PublishSource::FallbackReplay => "fallback_replay",
        }
    }
}

/// A chat message, as passed into `MessagePipeline::receive` and as returned
/// from the primary store once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Opaque identifier; absent (`None`) until the primary store assigns one,
    /// unless the caller is replaying a message that already had one (fallback
    /// replay preserves the original id — spec.md §4.6).
    pub id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub subtype: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub metadata: Map<String, serde_json::Value>,
    /// Preserved once, on first edit, per the "immutable except content edits
    /// which preserve originalContent" invariant.
    pub original_content: Option<String>,
}

/// Maximum content length the stream bus will publish (spec.md §4.1, §4.7).
pub const MAX_PUBLISHED_CONTENT_BYTES: usize = 500;

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self {
            id: None,
            conversation_id,
            sender_id,
            receiver_id: None,
            content: content.into(),
            message_type,
            subtype: None,
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            edited_at: None,
            metadata: Map::new(),
            original_content: None,
        }
    }

    pub fn with_receiver(mut self, receiver_id: UserId) -> Self {
        self.receiver_id = Some(receiver_id);
        self
    }

    /// Edit content, preserving the pre-edit value exactly once.
    pub fn edit_content(&mut self, new_content: impl Into<String>) {
        if self.original_content.is_none() {
            self.original_content = Some(self.content.clone());
        }
        self.content = new_content.into();
        self.edited_at = Some(Utc::now());
        self.status = MessageStatus::Edited;
    }

    /// Content truncated to the stream bus's publish cap, on a UTF-8 boundary.
    pub fn truncated_content(&self) -> String {
        truncate_utf8(&self.content, MAX_PUBLISHED_CONTENT_BYTES)
    }
}

/// Truncate `s` to at most `max_bytes` bytes without splitting a UTF-8 char.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// A conversation participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub matricule: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// A conversation, as seen by the router when enriching receiver lists
/// (spec.md §2, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRef {
    pub id: ConversationId,
    pub participants: Vec<Participant>,
    pub is_private: bool,
    pub title: Option<String>,
    pub created_by: UserId,
    pub settings: Map<String, serde_json::Value>,
}

impl ConversationRef {
    /// The participant whose id isn't `sender_id`, if there's exactly one
    /// (spec.md §4.7: "if ambiguous (>1), leaves receiverId empty").
    pub fn other_participant(&self, sender_id: &UserId) -> Option<&UserId> {
        let mut others = self.participants.iter().filter(|p| &p.user_id != sender_id).map(|p| &p.user_id);
        let first = others.next()?;
        if others.next().is_some() {
            None
        } else {
            Some(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: &str) -> Participant {
        Participant { user_id: UserId::new(id), matricule: None, joined_at: Utc::now() }
    }

    #[test]
    fn other_participant_resolves_unambiguous_pair() {
        let conv = ConversationRef {
            id: ConversationId::new("c1"),
            participants: vec![participant("a"), participant("b")],
            is_private: true,
            title: None,
            created_by: UserId::new("a"),
            settings: Map::new(),
        };
        assert_eq!(conv.other_participant(&UserId::new("a")), Some(&UserId::new("b")));
    }

    #[test]
    fn other_participant_is_none_when_ambiguous() {
        let conv = ConversationRef {
            id: ConversationId::new("c1"),
            participants: vec![participant("a"), participant("b"), participant("c")],
            is_private: false,
            title: None,
            created_by: UserId::new("a"),
            settings: Map::new(),
        };
        assert_eq!(conv.other_participant(&UserId::new("a")), None);
    }

    #[test]
    fn edit_content_preserves_original_once() {
        let mut msg = Message::new(ConversationId::new("c1"), UserId::new("a"), "hello", MessageType::Text);
        msg.edit_content("hello world");
        assert_eq!(msg.original_content.as_deref(), Some("hello"));
        msg.edit_content("hello world again");
        assert_eq!(msg.original_content.as_deref(), Some("hello"), "original is preserved only once");
        assert_eq!(msg.status, MessageStatus::Edited);
    }

    #[test]
    fn truncated_content_respects_utf8_boundaries() {
        let s = "a".repeat(MAX_PUBLISHED_CONTENT_BYTES - 1) + "é"; // 2-byte char straddling the cap
        let truncated = truncate_utf8(&s, MAX_PUBLISHED_CONTENT_BYTES);
        assert!(truncated.len() <= MAX_PUBLISHED_CONTENT_BYTES);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }
}
