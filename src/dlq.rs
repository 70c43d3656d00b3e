//! Dead-letter queue for terminal failures: poison messages that exhausted
//! retries or failed both the primary store and the fallback path
//! (spec.md §4.5, §4.6).

use crate::error::CoreError;
use crate::ids::WalId;
use crate::message::Message;
use crate::stream_bus::StreamBus;
use crate::time::epoch_millis;
use std::collections::HashMap;

pub const DLQ_STREAM: &str = "dlq:stream";

/// Error text is capped at this many bytes, mirroring the content cap the
/// router applies to published messages (spec.md §4.1).
pub const MAX_ERROR_BYTES: usize = 500;

#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub entry_id: String,
    pub message: Message,
    pub error: String,
    pub attempts: u32,
    pub poison: bool,
    pub wal_id: Option<WalId>,
    pub added_at_ms: u64,
}

pub struct Dlq {
    bus: StreamBus,
    maxlen: u64,
}

impl Dlq {
    pub fn new(bus: StreamBus, maxlen: u64) -> Self {
        Self { bus, maxlen }
    }

    pub async fn add(
        &self,
        msg: &Message,
        error: &CoreError,
        attempts: u32,
        poison: bool,
        wal_id: Option<&WalId>,
    ) -> Result<(), CoreError> {
        let error_text = crate::message::truncate_utf8(&error.to_string(), MAX_ERROR_BYTES);
        tracing::error!(
            message_id = msg.id.as_ref().map(|m| m.as_str()).unwrap_or("pending"),
            attempts,
            poison,
            "routing message to DLQ"
        );
        let mut fields = HashMap::new();
        fields.insert("data".to_string(), serde_json::to_string(msg).unwrap_or_default());
        fields.insert("error".to_string(), error_text);
        fields.insert("attempts".to_string(), attempts.to_string());
        fields.insert("poison".to_string(), poison.to_string());
        fields.insert("wal_id".to_string(), wal_id.map(|w| w.as_str().to_string()).unwrap_or_default());
        fields.insert("added_at_ms".to_string(), epoch_millis().to_string());
        self.bus.append(DLQ_STREAM, &fields, self.maxlen).await
    }

    /// The `depth` and `recent` entries a `DLQMonitor` tick reports on.
    pub async fn depth(&self) -> Result<u64, CoreError> {
        self.bus.length(DLQ_STREAM).await
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<DlqEntry>, CoreError> {
        let raw = self.bus.read_range(DLQ_STREAM, "-", "+", limit).await?;
        Ok(raw
            .into_iter()
            .rev()
            .take(limit)
            .map(|entry| {
                let message: Message = entry.fields.get("data").and_then(|s| serde_json::from_str(s).ok()).unwrap_or_else(|| {
                    Message::new(
                        crate::ids::ConversationId::new(""),
                        crate::ids::UserId::new(""),
                        "",
                        crate::message::MessageType::System,
                    )
                });
                DlqEntry {
                    entry_id: entry.id,
                    message,
                    error: entry.fields.get("error").cloned().unwrap_or_default(),
                    attempts: entry.fields.get("attempts").and_then(|s| s.parse().ok()).unwrap_or(0),
                    poison: entry.fields.get("poison").map(|s| s == "true").unwrap_or(false),
                    wal_id: entry.fields.get("wal_id").filter(|s| !s.is_empty()).map(|s| WalId::new(s.clone())),
                    added_at_ms: entry.fields.get("added_at_ms").and_then(|s| s.parse().ok()).unwrap_or(0),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_error_bytes_matches_content_cap() {
        assert_eq!(MAX_ERROR_BYTES, crate::message::MAX_PUBLISHED_CONTENT_BYTES);
    }
}
