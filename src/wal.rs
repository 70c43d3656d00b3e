//! Write-ahead log: a pre-write/post-write pair around every primary-store
//! save, so a crash between "saved" and "published" is detectable and
//! recoverable (spec.md §4.4).

use crate::error::CoreError;
use crate::ids::{MessageId, WalId};
use crate::stream_bus::{to_string_field, StreamBus};
use serde_json::json;
use std::collections::HashMap;

pub const WAL_STREAM: &str = "wal:stream";

/// Default age past which a pre-write with no matching post-write is
/// considered lost (spec.md §4.4, §6 `walTimeoutMs`).
pub const DEFAULT_WAL_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalEntryKind {
    PreWrite,
    PostWrite,
}

impl WalEntryKind {
    fn as_str(self) -> &'static str {
        match self {
            WalEntryKind::PreWrite => "pre_write",
            WalEntryKind::PostWrite => "post_write",
        }
    }
}

/// A pre-write entry found by [`Wal::scan_incomplete`] with no matching
/// post-write, older than the configured timeout.
#[derive(Debug, Clone)]
pub struct IncompleteEntry {
    pub entry_id: String,
    pub wal_id: WalId,
    pub message_id: Option<MessageId>,
    pub logged_at_ms: u64,
}

pub struct Wal {
    bus: StreamBus,
    maxlen: u64,
    timeout_ms: u64,
}

impl Wal {
    pub fn new(bus: StreamBus, maxlen: u64, timeout_ms: u64) -> Self {
        Self { bus, maxlen, timeout_ms }
    }

    fn now_ms() -> u64 {
        crate::time::epoch_millis()
    }

    /// Log a pre-write before attempting the primary-store save. The
    /// returned `WalId` is threaded through to `log_post`.
    pub async fn log_pre(&self, message_id: Option<&MessageId>) -> Result<WalId, CoreError> {
        let wal_id = WalId::new(uuid::Uuid::new_v4().to_string());
        let mut fields = HashMap::new();
        fields.insert("kind".to_string(), WalEntryKind::PreWrite.as_str().to_string());
        fields.insert("wal_id".to_string(), wal_id.as_str().to_string());
        fields.insert("message_id".to_string(), to_string_field(&json!(message_id.map(|m| m.as_str()))));
        fields.insert("logged_at_ms".to_string(), Self::now_ms().to_string());
        self.bus.append(WAL_STREAM, &fields, self.maxlen).await?;
        Ok(wal_id)
    }

    /// Log the post-write once the save has succeeded. A completed write
    /// leaves zero WAL residue: this finds the matching pre-write entry (by
    /// `wal_id`) and deletes it, so nothing about a finished write lingers
    /// in the stream past this call.
    pub async fn log_post(&self, _message_id: &MessageId, wal_id: &WalId) -> Result<(), CoreError> {
        if let Some(entry_id) = self.find_pre_write_entry(wal_id).await? {
            self.bus.delete(WAL_STREAM, &entry_id).await?;
        }
        Ok(())
    }

    /// Scan for the pre-write entry matching `wal_id`, returning its stream
    /// entry id if still present.
    async fn find_pre_write_entry(&self, wal_id: &WalId) -> Result<Option<String>, CoreError> {
        let entries = self.bus.read_range(WAL_STREAM, "-", "+", 10_000).await?;
        for entry in entries {
            if entry.fields.get("kind").map(String::as_str) == Some("pre_write") && entry.fields.get("wal_id").map(String::as_str) == Some(wal_id.as_str()) {
                return Ok(Some(entry.id));
            }
        }
        Ok(None)
    }

    /// Remove a resolved WAL entry (both its pre-write and any post-write)
    /// by stream entry id. Called by `WALRecoveryWorker` once an incomplete
    /// entry has been resolved one way or the other.
    pub async fn clear(&self, entry_id: &str) -> Result<(), CoreError> {
        self.bus.delete(WAL_STREAM, entry_id).await
    }

    /// Scan the WAL for pre-writes older than the configured timeout with no
    /// matching post-write for the same `wal_id`.
    pub async fn scan_incomplete(&self) -> Result<Vec<IncompleteEntry>, CoreError> {
        let entries = self.bus.read_range(WAL_STREAM, "-", "+", 10_000).await?;
        let mut posted: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut pre_writes = Vec::new();
        for entry in &entries {
            match entry.fields.get("kind").map(String::as_str) {
                Some("post_write") => {
                    if let Some(wal_id) = entry.fields.get("wal_id") {
                        posted.insert(wal_id.clone());
                    }
                }
                Some("pre_write") => pre_writes.push(entry.clone()),
                _ => {}
            }
        }
        let now = Self::now_ms();
        let mut incomplete = Vec::new();
        for entry in pre_writes {
            let wal_id = match entry.fields.get("wal_id") {
                Some(id) => WalId::new(id.clone()),
                None => continue,
            };
            if posted.contains(wal_id.as_str()) {
                continue;
            }
            let logged_at_ms: u64 = entry.fields.get("logged_at_ms").and_then(|s| s.parse().ok()).unwrap_or(0);
            if now.saturating_sub(logged_at_ms) < self.timeout_ms {
                continue;
            }
            let message_id = entry.fields.get("message_id").filter(|s| !s.is_empty()).map(|s| MessageId::new(s.clone()));
            incomplete.push(IncompleteEntry { entry_id: entry.id, wal_id, message_id, logged_at_ms });
        }
        Ok(incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_entry_kind_strings_match_spec_vocabulary() {
        assert_eq!(WalEntryKind::PreWrite.as_str(), "pre_write");
        assert_eq!(WalEntryKind::PostWrite.as_str(), "post_write");
    }
}
