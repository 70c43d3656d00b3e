//! `MessagingCore`: the facade a caller constructs once, injecting its own
//! `PrimaryStore` and a Redis connection, then drives via `receive`,
//! `publish_*`, and `health` (spec.md §6, SPEC_FULL.md §9-10).

use crate::circuit_breaker::CircuitState;
use crate::config::Config;
use crate::fallback_store::FallbackCounters;
use crate::ids::{ConversationId, MessageId, UserId};
use crate::message::{Message, PublishSource};
use crate::pipeline::{MessagePipeline, ReceiveOutcome, ReceiveRejected};
use crate::router::PublishRequest;
use crate::stream_bus::StreamBus;
use crate::workers::WorkerHandle;
use std::sync::Arc;

/// Aggregate health snapshot (SPEC_FULL.md §10, not present in the
/// distilled spec — exposes what `StreamMonitor`/`DLQMonitor` already
/// collect for a caller-owned health endpoint instead of only logging it).
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub circuit_state: CircuitState,
    pub dlq_depth: u64,
    pub fallback_counters: FallbackCounters,
    pub stream_lengths: Vec<(&'static str, u64)>,
}

pub struct MessagingCore {
    pipeline: Arc<MessagePipeline>,
    bus: StreamBus,
    config: Config,
    workers: Vec<WorkerHandle>,
}

impl MessagingCore {
    pub fn new(pipeline: Arc<MessagePipeline>, bus: StreamBus, config: Config) -> Self {
        Self { pipeline, bus, config, workers: Vec::new() }
    }

    /// Track a spawned worker so `shutdown` can stop it later. Callers
    /// typically spawn workers via `crate::workers::*::spawn` and hand the
    /// handles here right after construction.
    pub fn track_worker(&mut self, handle: WorkerHandle) {
        self.workers.push(handle);
    }

    /// The configuration this core was constructed with, for a caller that
    /// wants to read back `max_retries`, worker intervals, etc. without
    /// holding its own copy.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn receive(&self, msg: Message) -> Result<ReceiveOutcome, ReceiveRejected> {
        self.pipeline.receive(msg).await
    }

    pub async fn publish_typing(&self, conversation_id: &ConversationId, user_id: &UserId, is_typing: bool) -> Option<String> {
        self.pipeline
            .router()
            .publish(PublishRequest::Typing { conversation_id, user_id, is_typing })
            .await
            .ok()
            .flatten()
    }

    pub async fn publish_read_receipt(
        &self,
        message_id: &MessageId,
        conversation_id: &ConversationId,
        user_id: &UserId,
        read_at_ms: u64,
    ) -> Option<String> {
        self.pipeline
            .router()
            .publish(PublishRequest::ReadReceipt { message_id, conversation_id, user_id, read_at_ms })
            .await
            .ok()
            .flatten()
    }

    pub async fn publish_notification(&self, user_id: &UserId, title: &str, body: &str, notification_type: &str) -> Option<String> {
        self.pipeline
            .router()
            .publish(PublishRequest::Notification { user_id, title, body, notification_type })
            .await
            .ok()
            .flatten()
    }

    pub async fn publish_system(&self, fields: std::collections::HashMap<String, String>, stream: Option<&str>) -> Option<String> {
        self.pipeline.router().publish(PublishRequest::System { fields, stream_override: stream }).await.ok().flatten()
    }

    /// Opt-in replay of a conversation's already-persisted messages onto the
    /// bus, from `from` onward. Not run automatically at construction
    /// (SPEC_FULL.md §9) — callers that want startup catch-up call this
    /// deliberately.
    pub async fn resync_stream(&self, conversation_id: &ConversationId, from: &MessageId) -> Result<u64, crate::error::CoreError> {
        let request = crate::store::PageRequest { cursor: Some(from.as_str().to_string()), page: None, limit: 1000, user_id: UserId::new("") };
        let page = self.pipeline.primary_store().find_by_conversation(conversation_id, request).await?;
        let mut republished = 0u64;
        for message in &page.messages {
            if self
                .pipeline
                .router()
                .publish(PublishRequest::Message { message, conversation: None, source: PublishSource::FallbackReplay })
                .await
                .is_ok()
            {
                republished += 1;
            }
        }
        Ok(republished)
    }

    pub async fn health(&self) -> HealthReport {
        let dlq_depth = self.pipeline.dlq().depth().await.unwrap_or(0);
        let fallback_counters = self.pipeline.fallback_store().counters().await.unwrap_or_default();

        let stream_names: [&'static str; 10] = [
            crate::wal::WAL_STREAM,
            crate::retry_scheduler::RETRY_STREAM,
            crate::fallback_store::FALLBACK_STREAM,
            crate::dlq::DLQ_STREAM,
            crate::router::MESSAGES_STREAM,
            crate::router::PRIVATE_STREAM,
            crate::router::GROUP_STREAM,
            crate::router::TYPING_STREAM,
            crate::router::READ_RECEIPT_STREAM,
            crate::router::SYSTEM_STREAM,
        ];
        let mut stream_lengths = Vec::new();
        for stream in stream_names {
            let length = self.bus.length(stream).await.unwrap_or(0);
            stream_lengths.push((stream, length));
        }

        HealthReport { circuit_state: self.pipeline.breaker().state(), dlq_depth, fallback_counters, stream_lengths }
    }

    /// The counters `receive` and the recovery workers increment, for a
    /// caller that wants to spawn its own `MetricsReporter` against them
    /// (`MetricsReporter::spawn(core.metrics().clone(), interval)`).
    pub fn metrics(&self) -> &Arc<crate::workers::MetricsCounters> {
        self.pipeline.metrics()
    }

    /// Stop every tracked worker, waiting for its in-flight tick to finish.
    pub async fn shutdown(self) {
        for worker in &self.workers {
            worker.shutdown();
        }
        for worker in self.workers {
            let _ = worker.join().await;
        }
    }
}
