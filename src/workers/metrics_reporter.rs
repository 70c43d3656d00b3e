//! Every 60 min, logs accumulated counters then resets them (spec.md §4.8).

use super::{spawn_interval_worker, WorkerHandle};
use crate::observability::MetricsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared counters components increment as they process messages; reset to
/// zero every time `MetricsReporter` ticks.
#[derive(Default)]
pub struct MetricsCounters {
    pub messages_received: AtomicU64,
    pub messages_saved_directly: AtomicU64,
    pub messages_parked: AtomicU64,
    pub messages_retried: AtomicU64,
    pub messages_poisoned: AtomicU64,
}

impl MetricsCounters {
    fn snapshot_and_reset(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.swap(0, Ordering::AcqRel),
            messages_saved_directly: self.messages_saved_directly.swap(0, Ordering::AcqRel),
            messages_parked: self.messages_parked.swap(0, Ordering::AcqRel),
            messages_retried: self.messages_retried.swap(0, Ordering::AcqRel),
            messages_poisoned: self.messages_poisoned.swap(0, Ordering::AcqRel),
        }
    }
}

pub struct MetricsReporter;

impl MetricsReporter {
    pub fn spawn(counters: Arc<MetricsCounters>, interval: Duration) -> WorkerHandle {
        spawn_interval_worker("metrics_reporter", interval, move || {
            let counters = counters.clone();
            async move {
                let snapshot = counters.snapshot_and_reset();
                tracing::info!(?snapshot, "metrics tick");
            }
        })
    }
}
