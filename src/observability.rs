//! Telemetry sink: a `CoreEvent` enum plus a `tower_service::Service`-based
//! sink trait, modeled on the teacher's (unwired) telemetry design. Emission
//! is always best-effort — a sink that can't keep up drops events rather
//! than blocking the hot path.

use std::fmt;
use std::task::{Context, Poll};
use tower_service::Service;

/// Counters and state-change notifications the core's components emit.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    CircuitOpened { failure_count: usize },
    CircuitClosed,
    RetryEnqueued { attempt: u32 },
    RetryExhausted { attempts: u32 },
    FallbackParked,
    FallbackReplayed,
    DlqAdded { poison: bool },
    WalRecovered { messages_found: bool },
    StreamOvershoot { stream: String, length: u64, maxlen: u64 },
    MemoryPressure { percent_used: f64, critical: bool },
    MetricsTick(MetricsSnapshot),
}

/// Counters `MetricsReporter` logs and resets every tick (spec.md §4.8).
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_saved_directly: u64,
    pub messages_parked: u64,
    pub messages_retried: u64,
    pub messages_poisoned: u64,
}

impl fmt::Display for CoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A sink for `CoreEvent`s. Implemented as `tower_service::Service` so
/// callers can compose it with `tower`'s combinators (buffering, rate
/// limiting) if they need to, the way the teacher's own (unwired)
/// `telemetry.rs` models its sinks.
pub trait TelemetrySink: Service<CoreEvent, Response = (), Error = std::convert::Infallible> + Send + Sync {}

impl<T> TelemetrySink for T where T: Service<CoreEvent, Response = (), Error = std::convert::Infallible> + Send + Sync {}

/// Emit best-effort: poll readiness without blocking; if the sink isn't
/// ready, drop the event rather than waiting.
pub fn emit_best_effort<S>(sink: &mut S, event: CoreEvent)
where
    S: Service<CoreEvent, Response = (), Error = std::convert::Infallible>,
{
    let mut cx = Context::from_waker(futures::task::noop_waker_ref());
    match sink.poll_ready(&mut cx) {
        Poll::Ready(Ok(())) => {
            let _ = sink.call(event);
        }
        _ => {
            tracing::debug!("telemetry sink not ready, dropping event");
        }
    }
}

/// The crate's only bundled sink: forwards every event to `tracing` at the
/// density the teacher uses for state transitions (state changes and
/// terminal failures logged, routine activity at debug).
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl Service<CoreEvent> for LogSink {
    type Response = ();
    type Error = std::convert::Infallible;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: CoreEvent) -> Self::Future {
        match &event {
            CoreEvent::CircuitOpened { failure_count } => {
                tracing::warn!(failure_count, "circuit breaker opened")
            }
            CoreEvent::CircuitClosed => tracing::info!("circuit breaker closed"),
            CoreEvent::RetryEnqueued { attempt } => tracing::debug!(attempt, "retry enqueued"),
            CoreEvent::RetryExhausted { attempts } => tracing::warn!(attempts, "retry exhausted"),
            CoreEvent::FallbackParked => tracing::info!("message parked to fallback"),
            CoreEvent::FallbackReplayed => tracing::info!("fallback entry replayed"),
            CoreEvent::DlqAdded { poison } => tracing::error!(poison, "message routed to dlq"),
            CoreEvent::WalRecovered { messages_found } => tracing::info!(messages_found, "wal recovery resolved an entry"),
            CoreEvent::StreamOvershoot { stream, length, maxlen } => {
                tracing::warn!(stream, length, maxlen, "stream length exceeds 1.5x maxlen")
            }
            CoreEvent::MemoryPressure { percent_used, critical } => {
                if *critical {
                    tracing::error!(percent_used, "memory pressure critical")
                } else {
                    tracing::warn!(percent_used, "memory pressure warning")
                }
            }
            CoreEvent::MetricsTick(snapshot) => tracing::info!(?snapshot, "metrics tick"),
        }
        std::future::ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sink_accepts_every_event_variant() {
        let mut sink = LogSink;
        emit_best_effort(&mut sink, CoreEvent::CircuitOpened { failure_count: 5 });
        emit_best_effort(&mut sink, CoreEvent::MetricsTick(MetricsSnapshot::default()));
    }
}
