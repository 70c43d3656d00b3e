//! `MessagePipeline`: the ordered receive protocol from spec.md §4.6, wiring
//! the WAL, circuit breaker, primary store, retry scheduler, fallback store,
//! DLQ, and router together.

use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::dlq::Dlq;
use crate::error::{CoreError, ResilienceError};
use crate::fallback_store::FallbackStore;
use crate::ids::MessageId;
use crate::message::{ConversationRef, Message, MessageStatus, PublishSource};
use crate::retry_scheduler::RetryScheduler;
use crate::router::{MultiStreamRouter, PublishRequest};
use crate::store::{ConversationStore, PrimaryStore};
use crate::wal::Wal;
use crate::workers::MetricsCounters;
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A hook a caller can back with a real set to make `receive` idempotent on
/// `message_id`. The spec's Non-goals exclude exactly-once delivery but call
/// out deduplication hooks as something the core supports alongside
/// at-least-once semantics (SPEC_FULL.md §10). Default is a no-op — every
/// message is treated as new.
#[async_trait]
pub trait Deduplicator: Send + Sync {
    /// Returns `true` if this message has already been seen and should be
    /// skipped.
    async fn seen(&self, message: &Message) -> bool;
    async fn mark_seen(&self, message: &Message);
}

pub struct NoopDeduplicator;

#[async_trait]
impl Deduplicator for NoopDeduplicator {
    async fn seen(&self, _message: &Message) -> bool {
        false
    }
    async fn mark_seen(&self, _message: &Message) {}
}

/// What `MessagePipeline::receive` hands back to its caller (spec.md §6:
/// `receive(msg) → {success, message, metrics}`).
#[derive(Debug, Clone)]
pub struct ReceiveOutcome {
    pub success: bool,
    pub message: Message,
    pub metrics: ReceiveMetrics,
}

#[derive(Debug, Clone, Default)]
pub struct ReceiveMetrics {
    pub saved_directly: bool,
    pub parked_to_fallback: bool,
    pub routed_to_dlq: bool,
    pub publish_entry_id: Option<String>,
}

/// Raised only when both the direct save and the fallback park fail — the
/// one case `receive` surfaces an error instead of always returning an
/// outcome (spec.md §4.6 "surface the error").
#[derive(Debug, thiserror::Error)]
#[error("message rejected by both primary store and fallback store: {0}")]
pub struct ReceiveRejected(pub CoreError);

pub struct MessagePipeline {
    primary_store: Arc<dyn PrimaryStore>,
    conversation_store: Option<Arc<dyn ConversationStore>>,
    breaker: CircuitBreakerPolicy,
    wal: Wal,
    retry_scheduler: RetryScheduler,
    fallback_store: FallbackStore,
    dlq: Dlq,
    router: MultiStreamRouter,
    deduplicator: Arc<dyn Deduplicator>,
    metrics: Arc<MetricsCounters>,
}

impl MessagePipeline {
    pub fn builder() -> MessagePipelineBuilder {
        MessagePipelineBuilder::default()
    }

    pub async fn receive(&self, mut msg: Message) -> Result<ReceiveOutcome, ReceiveRejected> {
        self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        if self.deduplicator.seen(&msg).await {
            return Ok(ReceiveOutcome { success: true, message: msg, metrics: ReceiveMetrics::default() });
        }

        // Assign a provisional id before the pre-write so a crash between save
        // and log_post still leaves a WAL entry the recovery worker can probe
        // the primary store with; `save` preserves an id that's already set,
        // same as it does for fallback replay.
        if msg.id.is_none() {
            msg.id = Some(MessageId::new(uuid::Uuid::new_v4().to_string()));
        }

        let conversation = self.resolve_conversation(&msg).await;

        let wal_id = self.wal.log_pre(msg.id.as_ref()).await.ok();

        let save_result = self
            .breaker
            .execute(|| {
                let store = self.primary_store.clone();
                let msg = msg.clone();
                async move { store.save(msg).await.map_err(|e| ResilienceError::Inner(CoreError::from(e))) }
            })
            .await;

        let mut metrics = ReceiveMetrics::default();

        match save_result {
            Ok(saved) => {
                msg = saved;
                metrics.saved_directly = true;
                self.metrics.messages_saved_directly.fetch_add(1, Ordering::Relaxed);
                let publish_result = self
                    .router
                    .publish(PublishRequest::Message { message: &msg, conversation: conversation.as_ref(), source: PublishSource::Direct })
                    .await;
                match publish_result {
                    Ok(id) => metrics.publish_entry_id = id,
                    Err(e) => tracing::warn!(error = %e, "best-effort publish failed after direct save"),
                }
                if let (Some(id), Some(wal_id)) = (&msg.id, &wal_id) {
                    if let Err(e) = self.wal.log_post(id, wal_id).await {
                        tracing::warn!(error = %e, "wal log_post failed");
                    }
                }
                self.deduplicator.mark_seen(&msg).await;
                Ok(ReceiveOutcome { success: true, message: msg, metrics })
            }
            Err(err) => {
                let core_err = err.as_inner().cloned().unwrap_or_else(|| CoreError::Transient(err.to_string()));
                tracing::warn!(error = %core_err, "direct save failed, entering recovery path");

                if core_err.retryable() {
                    if let Err(e) = self.retry_scheduler.enqueue(&msg, 1, &core_err).await {
                        tracing::warn!(error = %e, "failed to enqueue retry entry");
                    } else {
                        self.metrics.messages_retried.fetch_add(1, Ordering::Relaxed);
                    }
                }

                let mut fallback_msg = msg.clone();
                fallback_msg.status = MessageStatus::PendingFallback;
                match self.fallback_store.park(&fallback_msg).await {
                    Ok(fallback_id) => {
                        metrics.parked_to_fallback = true;
                        self.metrics.messages_parked.fetch_add(1, Ordering::Relaxed);
                        let publish_result = self
                            .router
                            .publish(PublishRequest::Message {
                                message: &fallback_msg,
                                conversation: conversation.as_ref(),
                                source: PublishSource::RedisFallback,
                            })
                            .await;
                        match publish_result {
                            Ok(id) => metrics.publish_entry_id = id,
                            Err(e) => tracing::warn!(error = %e, "best-effort publish failed after fallback park"),
                        }
                        tracing::info!(fallback_id = %fallback_id, "message parked to fallback store");
                        Ok(ReceiveOutcome { success: true, message: fallback_msg, metrics })
                    }
                    Err(fallback_err) => {
                        metrics.routed_to_dlq = true;
                        self.metrics.messages_poisoned.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = self.dlq.add(&msg, &core_err, 1, true, wal_id.as_ref()).await {
                            tracing::error!(error = %e, "failed to route message to dlq after fallback also failed");
                        }
                        Err(ReceiveRejected(fallback_err))
                    }
                }
            }
        }
    }

    async fn resolve_conversation(&self, msg: &Message) -> Option<ConversationRef> {
        let store = self.conversation_store.as_ref()?;
        store.find_by_id(&msg.conversation_id).await.ok().flatten()
    }

    pub fn router(&self) -> &MultiStreamRouter {
        &self.router
    }

    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    pub fn retry_scheduler(&self) -> &RetryScheduler {
        &self.retry_scheduler
    }

    pub fn fallback_store(&self) -> &FallbackStore {
        &self.fallback_store
    }

    pub fn dlq(&self) -> &Dlq {
        &self.dlq
    }

    pub fn breaker(&self) -> &CircuitBreakerPolicy {
        &self.breaker
    }

    pub fn primary_store(&self) -> &Arc<dyn PrimaryStore> {
        &self.primary_store
    }

    /// Shared counters `MetricsReporter` logs and resets every tick
    /// (spec.md §4.8). `receive` and the recovery workers increment these
    /// as messages flow through; wiring a `MetricsReporter` to this same
    /// `Arc` is how a caller gets periodic reporting.
    pub fn metrics(&self) -> &Arc<MetricsCounters> {
        &self.metrics
    }
}

/// Builder mirroring the teacher's `ResilienceStackBuilder`: no process-wide
/// singletons, every dependency is explicit (REDESIGN FLAGS).
#[derive(Default)]
pub struct MessagePipelineBuilder {
    primary_store: Option<Arc<dyn PrimaryStore>>,
    conversation_store: Option<Arc<dyn ConversationStore>>,
    breaker: Option<CircuitBreakerPolicy>,
    wal: Option<Wal>,
    retry_scheduler: Option<RetryScheduler>,
    fallback_store: Option<FallbackStore>,
    dlq: Option<Dlq>,
    router: Option<MultiStreamRouter>,
    deduplicator: Option<Arc<dyn Deduplicator>>,
    metrics: Option<Arc<MetricsCounters>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing required component: {0}")]
    Missing(&'static str),
}

impl MessagePipelineBuilder {
    pub fn primary_store(mut self, store: Arc<dyn PrimaryStore>) -> Self {
        self.primary_store = Some(store);
        self
    }

    pub fn conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversation_store = Some(store);
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerPolicy) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn wal(mut self, wal: Wal) -> Self {
        self.wal = Some(wal);
        self
    }

    pub fn retry_scheduler(mut self, scheduler: RetryScheduler) -> Self {
        self.retry_scheduler = Some(scheduler);
        self
    }

    pub fn fallback_store(mut self, store: FallbackStore) -> Self {
        self.fallback_store = Some(store);
        self
    }

    pub fn dlq(mut self, dlq: Dlq) -> Self {
        self.dlq = Some(dlq);
        self
    }

    pub fn router(mut self, router: MultiStreamRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn deduplicator(mut self, deduplicator: Arc<dyn Deduplicator>) -> Self {
        self.deduplicator = Some(deduplicator);
        self
    }

    /// Share a `MetricsCounters` with a caller-owned `MetricsReporter`
    /// instead of the fresh, unobserved one `build` creates by default.
    pub fn metrics(mut self, metrics: Arc<MetricsCounters>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<MessagePipeline, BuildError> {
        Ok(MessagePipeline {
            primary_store: self.primary_store.ok_or(BuildError::Missing("primary_store"))?,
            conversation_store: self.conversation_store,
            breaker: self.breaker.ok_or(BuildError::Missing("breaker"))?,
            wal: self.wal.ok_or(BuildError::Missing("wal"))?,
            retry_scheduler: self.retry_scheduler.ok_or(BuildError::Missing("retry_scheduler"))?,
            fallback_store: self.fallback_store.ok_or(BuildError::Missing("fallback_store"))?,
            dlq: self.dlq.ok_or(BuildError::Missing("dlq"))?,
            router: self.router.ok_or(BuildError::Missing("router"))?,
            deduplicator: self.deduplicator.unwrap_or_else(|| Arc::new(NoopDeduplicator)),
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}
