//! Every 5s, logs DLQ depth and recent entries, alerting past the threshold
//! (spec.md §4.8).

use super::{spawn_interval_worker, WorkerHandle};
use crate::dlq::Dlq;
use std::sync::Arc;
use std::time::Duration;

const RECENT_LIMIT: usize = 5;

pub struct DlqMonitor;

impl DlqMonitor {
    pub fn spawn(dlq: Arc<Dlq>, alert_threshold: u64, interval: Duration) -> WorkerHandle {
        spawn_interval_worker("dlq_monitor", interval, move || {
            let dlq = dlq.clone();
            async move {
                match dlq.depth().await {
                    Ok(depth) => {
                        if depth > alert_threshold {
                            tracing::error!(depth, alert_threshold, "dlq depth exceeds threshold");
                        } else {
                            tracing::info!(depth, "dlq depth");
                        }
                        if let Ok(recent) = dlq.recent(RECENT_LIMIT).await {
                            for entry in recent {
                                tracing::info!(entry_id = %entry.entry_id, poison = entry.poison, attempts = entry.attempts, "recent dlq entry");
                            }
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "dlq monitor tick failed"),
                }
            }
        })
    }
}
