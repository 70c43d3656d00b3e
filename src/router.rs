//! Routes a published message (or event) to the right stream, deterministically
//! (spec.md §4.7).

use crate::config::StreamLimits;
use crate::ids::{ConversationId, MessageId, UserId};
use crate::message::{ConversationRef, Message, MessageType, PublishSource};
use crate::stream_bus::StreamBus;
use std::collections::HashMap;

pub const MESSAGES_STREAM: &str = "messages:stream";
pub const PRIVATE_STREAM: &str = "stream:messages:private";
pub const GROUP_STREAM: &str = "stream:messages:group";
pub const TYPING_STREAM: &str = "stream:events:typing";
pub const READ_RECEIPT_STREAM: &str = "stream:events:read";
pub const SYSTEM_STREAM: &str = "stream:messages:system";

/// Non-message events the router also publishes — typing indicators, read
/// receipts, notifications, and raw system envelopes (spec.md §6 "To
/// MessagePipeline (caller-visible)").
pub enum PublishRequest<'a> {
    Message { message: &'a Message, conversation: Option<&'a ConversationRef>, source: PublishSource },
    Typing { conversation_id: &'a ConversationId, user_id: &'a UserId, is_typing: bool },
    ReadReceipt { message_id: &'a MessageId, conversation_id: &'a ConversationId, user_id: &'a UserId, read_at_ms: u64 },
    Notification { user_id: &'a UserId, title: &'a str, body: &'a str, notification_type: &'a str },
    System { fields: HashMap<String, String>, stream_override: Option<&'a str> },
}

pub struct MultiStreamRouter {
    bus: StreamBus,
    limits: StreamLimits,
}

impl MultiStreamRouter {
    pub fn new(bus: StreamBus, limits: StreamLimits) -> Self {
        Self { bus, limits }
    }

    /// Which stream a message (not an event) lands on, applying the ordered
    /// conditions from spec.md §4.7 exactly. Exposed separately from
    /// `publish` so the routing decision is unit-testable without a bus.
    pub fn route_for_message(message: &Message, conversation: Option<&ConversationRef>) -> (&'static str, Option<UserId>) {
        if message.message_type == MessageType::System {
            return (SYSTEM_STREAM, message.receiver_id.clone());
        }

        let mut receiver_id = message.receiver_id.clone();
        if receiver_id.is_none() {
            if let Some(conv) = conversation {
                receiver_id = conv.other_participant(&message.sender_id).cloned();
            }
        }

        if receiver_id.is_some() {
            return (PRIVATE_STREAM, receiver_id);
        }
        if !message.conversation_id.as_str().is_empty() {
            return (GROUP_STREAM, None);
        }
        (MESSAGES_STREAM, None)
    }

    fn maxlen_for(&self, stream: &str) -> u64 {
        match stream {
            MESSAGES_STREAM => self.limits.messages_stream,
            PRIVATE_STREAM => self.limits.private_stream,
            GROUP_STREAM => self.limits.group_stream,
            TYPING_STREAM => self.limits.typing_stream,
            READ_RECEIPT_STREAM => self.limits.read_receipt_stream,
            SYSTEM_STREAM => self.limits.system_stream,
            _ => self.limits.messages_stream,
        }
    }

    pub async fn publish(&self, request: PublishRequest<'_>) -> Result<Option<String>, crate::error::CoreError> {
        match request {
            PublishRequest::Message { message, conversation, source } => {
                let (stream, receiver_id) = Self::route_for_message(message, conversation);
                let mut fields = HashMap::new();
                fields.insert("message_id".to_string(), message.id.as_ref().map(|m| m.as_str().to_string()).unwrap_or_default());
                fields.insert("conversation_id".to_string(), message.conversation_id.as_str().to_string());
                fields.insert("sender_id".to_string(), message.sender_id.as_str().to_string());
                fields.insert("receiver_id".to_string(), receiver_id.map(|r| r.as_str().to_string()).unwrap_or_default());
                fields.insert("content".to_string(), message.truncated_content());
                fields.insert("type".to_string(), format!("{:?}", message.message_type).to_uppercase());
                fields.insert("status".to_string(), format!("{:?}", message.status).to_uppercase());
                fields.insert("created_at".to_string(), message.created_at.timestamp_millis().to_string());
                fields.insert("source".to_string(), source.as_str().to_string());
                let id = self.bus.append(stream, &fields, self.maxlen_for(stream)).await?;
                Ok(Some(id))
            }
            PublishRequest::Typing { conversation_id, user_id, is_typing } => {
                let mut fields = HashMap::new();
                fields.insert("conversation_id".to_string(), conversation_id.as_str().to_string());
                fields.insert("user_id".to_string(), user_id.as_str().to_string());
                fields.insert("is_typing".to_string(), is_typing.to_string());
                let id = self.bus.append(TYPING_STREAM, &fields, self.maxlen_for(TYPING_STREAM)).await?;
                Ok(Some(id))
            }
            PublishRequest::ReadReceipt { message_id, conversation_id, user_id, read_at_ms } => {
                let mut fields = HashMap::new();
                fields.insert("message_id".to_string(), message_id.as_str().to_string());
                fields.insert("conversation_id".to_string(), conversation_id.as_str().to_string());
                fields.insert("user_id".to_string(), user_id.as_str().to_string());
                fields.insert("read_at".to_string(), read_at_ms.to_string());
                let id = self.bus.append(READ_RECEIPT_STREAM, &fields, self.maxlen_for(READ_RECEIPT_STREAM)).await?;
                Ok(Some(id))
            }
            PublishRequest::Notification { user_id, title, body, notification_type } => {
                let mut fields = HashMap::new();
                fields.insert("user_id".to_string(), user_id.as_str().to_string());
                fields.insert("title".to_string(), title.to_string());
                fields.insert("body".to_string(), crate::message::truncate_utf8(body, crate::message::MAX_PUBLISHED_CONTENT_BYTES));
                fields.insert("notification_type".to_string(), notification_type.to_string());
                let id = self.bus.append(SYSTEM_STREAM, &fields, self.maxlen_for(SYSTEM_STREAM)).await?;
                Ok(Some(id))
            }
            PublishRequest::System { fields, stream_override } => {
                let stream = stream_override.unwrap_or(SYSTEM_STREAM);
                let id = self.bus.append(stream, &fields, self.maxlen_for(stream)).await?;
                Ok(Some(id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ConversationId, UserId};
    use crate::message::{Message, MessageType, Participant};
    use chrono::Utc;

    fn base_message() -> Message {
        Message::new(ConversationId::new("c1"), UserId::new("u1"), "hi", MessageType::Text)
    }

    #[test]
    fn system_type_always_routes_to_system_stream() {
        let msg = Message::new(ConversationId::new(""), UserId::new("u1"), "evt", MessageType::System);
        let (stream, _) = MultiStreamRouter::route_for_message(&msg, None);
        assert_eq!(stream, SYSTEM_STREAM);
    }

    #[test]
    fn explicit_receiver_routes_to_private_stream() {
        let msg = base_message().with_receiver(UserId::new("u2"));
        let (stream, receiver) = MultiStreamRouter::route_for_message(&msg, None);
        assert_eq!(stream, PRIVATE_STREAM);
        assert_eq!(receiver, Some(UserId::new("u2")));
    }

    #[test]
    fn empty_receiver_derived_from_unambiguous_conversation() {
        let msg = base_message();
        let conv = ConversationRef {
            id: ConversationId::new("c1"),
            participants: vec![
                Participant { user_id: UserId::new("u1"), matricule: None, joined_at: Utc::now() },
                Participant { user_id: UserId::new("u2"), matricule: None, joined_at: Utc::now() },
            ],
            is_private: true,
            title: None,
            created_by: UserId::new("u1"),
            settings: Default::default(),
        };
        let (stream, receiver) = MultiStreamRouter::route_for_message(&msg, Some(&conv));
        assert_eq!(stream, PRIVATE_STREAM);
        assert_eq!(receiver, Some(UserId::new("u2")));
    }

    #[test]
    fn ambiguous_conversation_falls_through_to_group_stream() {
        let msg = base_message();
        let conv = ConversationRef {
            id: ConversationId::new("c1"),
            participants: vec![
                Participant { user_id: UserId::new("u1"), matricule: None, joined_at: Utc::now() },
                Participant { user_id: UserId::new("u2"), matricule: None, joined_at: Utc::now() },
                Participant { user_id: UserId::new("u3"), matricule: None, joined_at: Utc::now() },
            ],
            is_private: false,
            title: None,
            created_by: UserId::new("u1"),
            settings: Default::default(),
        };
        let (stream, receiver) = MultiStreamRouter::route_for_message(&msg, Some(&conv));
        assert_eq!(stream, GROUP_STREAM);
        assert_eq!(receiver, None);
    }

    #[test]
    fn message_with_no_receiver_and_no_conversation_falls_to_default_stream() {
        let msg = Message::new(ConversationId::new(""), UserId::new("u1"), "hi", MessageType::Text);
        let (stream, _) = MultiStreamRouter::route_for_message(&msg, None);
        assert_eq!(stream, MESSAGES_STREAM);
    }
}
