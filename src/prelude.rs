//! Convenient re-exports for common messaging-core types.
pub use crate::{
    cache::{CacheTier, CacheTtls, CachedMessageView},
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState},
    config::{Config, ConfigBuilder, StreamLimits, WorkerIntervals},
    core::{HealthReport, MessagingCore},
    dlq::{Dlq, DlqEntry},
    error::{CoreError, ResilienceError},
    fallback_store::{FallbackCounters, FallbackEntry, FallbackStore},
    ids::{ConversationId, FallbackId, MessageId, UserId, WalId},
    message::{ConversationRef, Message, MessageStatus, MessageType, Participant, PublishSource},
    observability::{CoreEvent, LogSink, MetricsSnapshot, TelemetrySink},
    pipeline::{Deduplicator, MessagePipeline, MessagePipelineBuilder, NoopDeduplicator, ReceiveOutcome, ReceiveRejected},
    presence::{PresenceData, PresenceRecord, PresenceRegistry, PresenceStatus},
    retry_scheduler::{RetryEntry, RetryScheduler},
    rooms::{RoomHealth, RoomMetadata, RoomPresenceStats, RoomRegistry, RoomRole, RoomState},
    router::{MultiStreamRouter, PublishRequest},
    store::{ConversationStore, MessagePage, MessageSelector, PageRequest, PrimaryStore, StoreError},
    stream_bus::{StreamBus, StreamEntry},
    wal::Wal,
    workers::{DlqMonitor, FallbackWorker, MemoryMonitor, MetricsCounters, MetricsReporter, RetryWorker, StreamMonitor, WalRecoveryWorker, WorkerHandle},
    BulkheadPolicy, RetryPolicy, TimeoutPolicy,
};
