//! Persistent, Redis-backed retry queue for saves that failed on the direct
//! path (spec.md §4.5). Distinct from [`crate::retry::RetryPolicy`], which
//! retries in-process inside a single `execute` call; this scheduler
//! survives across ticks and processes.

use crate::error::CoreError;
use crate::message::Message;
use crate::stream_bus::StreamBus;
use crate::time::epoch_millis;
use std::collections::HashMap;

pub const RETRY_STREAM: &str = "retry:stream";

/// `nextRetryAt = now + BASE_MS * 2^(attempt-1)` (spec.md §4.5).
pub const BASE_MS: u64 = 100;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

fn next_retry_at(now_ms: u64, attempt: u32) -> u64 {
    let backoff = BASE_MS.saturating_mul(1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX));
    now_ms.saturating_add(backoff)
}

/// A pending retry, as decoded from its stream entry.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub entry_id: String,
    pub message: Message,
    pub attempt: u32,
    pub next_retry_at_ms: u64,
    pub last_error: String,
}

/// Outcome of draining one retry entry, used by the `RetryWorker` to decide
/// what to do with the entry next.
pub enum DrainOutcome {
    Succeeded(Message),
    ReEnqueued,
    Poisoned { message: Message, last_error: String },
}

pub struct RetryScheduler {
    bus: StreamBus,
    maxlen: u64,
    max_retries: u32,
}

impl RetryScheduler {
    pub fn new(bus: StreamBus, maxlen: u64, max_retries: u32) -> Self {
        Self { bus, maxlen, max_retries }
    }

    /// Serialize `msg` and append a retry entry computed for `attempt`.
    /// `attempt` never regresses — callers always pass the attempt number
    /// they're about to make, starting at 1.
    pub async fn enqueue(&self, msg: &Message, attempt: u32, err: &CoreError) -> Result<(), CoreError> {
        let now = epoch_millis();
        let mut fields = HashMap::new();
        fields.insert("data".to_string(), serde_json::to_string(msg).unwrap_or_default());
        fields.insert("attempt".to_string(), attempt.to_string());
        fields.insert("next_retry_at_ms".to_string(), next_retry_at(now, attempt).to_string());
        fields.insert("last_error".to_string(), err.to_string());
        self.bus.append(RETRY_STREAM, &fields, self.maxlen).await?;
        Ok(())
    }

    /// Pull up to `batch_size` entries whose `next_retry_at_ms <= now`,
    /// oldest first. Malformed entries (missing/empty `data`) are deleted
    /// immediately and not returned.
    pub async fn due_entries(&self, batch_size: usize) -> Result<Vec<RetryEntry>, CoreError> {
        let raw = self.bus.read_range(RETRY_STREAM, "-", "+", batch_size.max(1) * 4).await?;
        let now = epoch_millis();
        let mut due = Vec::new();
        for entry in raw {
            let data = entry.fields.get("data").cloned().unwrap_or_default();
            if data.is_empty() {
                self.bus.delete(RETRY_STREAM, &entry.id).await.ok();
                continue;
            }
            let message: Message = match serde_json::from_str(&data) {
                Ok(m) => m,
                Err(_) => {
                    self.bus.delete(RETRY_STREAM, &entry.id).await.ok();
                    continue;
                }
            };
            let attempt: u32 = entry.fields.get("attempt").and_then(|s| s.parse().ok()).unwrap_or(1);
            let next_retry_at_ms: u64 = entry.fields.get("next_retry_at_ms").and_then(|s| s.parse().ok()).unwrap_or(0);
            let last_error = entry.fields.get("last_error").cloned().unwrap_or_default();
            if next_retry_at_ms > now {
                continue;
            }
            due.push(RetryEntry { entry_id: entry.id, message, attempt, next_retry_at_ms, last_error });
            if due.len() >= batch_size {
                break;
            }
        }
        Ok(due)
    }

    /// Remove a retry entry once it has been resolved (succeeded, re-enqueued
    /// under a fresh entry, or poisoned into the DLQ).
    pub async fn remove(&self, entry_id: &str) -> Result<(), CoreError> {
        self.bus.delete(RETRY_STREAM, entry_id).await
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_retry_at_grows_exponentially() {
        let now = 1_000_000u64;
        assert_eq!(next_retry_at(now, 1), now + 100);
        assert_eq!(next_retry_at(now, 2), now + 200);
        assert_eq!(next_retry_at(now, 3), now + 400);
        assert_eq!(next_retry_at(now, 4), now + 800);
    }

    #[test]
    fn next_retry_at_does_not_overflow_on_large_attempt() {
        let now = 1_000_000u64;
        let at = next_retry_at(now, 100);
        assert!(at >= now);
    }
}
