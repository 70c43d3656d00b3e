//! Every 60s, records per-stream length vs MAXLEN, warning past 1.5x
//! (spec.md §4.8).

use super::{spawn_interval_worker, WorkerHandle};
use crate::config::StreamLimits;
use crate::stream_bus::StreamBus;
use std::time::Duration;

pub struct StreamMonitor;

impl StreamMonitor {
    pub fn spawn(bus: StreamBus, limits: StreamLimits, overshoot_ratio: f64, interval: Duration) -> WorkerHandle {
        spawn_interval_worker("stream_monitor", interval, move || {
            let bus = bus.clone();
            let streams = [
                (crate::wal::WAL_STREAM, limits.wal_stream),
                (crate::retry_scheduler::RETRY_STREAM, limits.retry_stream),
                (crate::fallback_store::FALLBACK_STREAM, limits.fallback_stream),
                (crate::dlq::DLQ_STREAM, limits.dlq_stream),
                (crate::router::MESSAGES_STREAM, limits.messages_stream),
                (crate::router::PRIVATE_STREAM, limits.private_stream),
                (crate::router::GROUP_STREAM, limits.group_stream),
                (crate::router::TYPING_STREAM, limits.typing_stream),
                (crate::router::READ_RECEIPT_STREAM, limits.read_receipt_stream),
                (crate::router::SYSTEM_STREAM, limits.system_stream),
            ];
            async move {
                for (stream, maxlen) in streams {
                    match bus.length(stream).await {
                        Ok(length) => {
                            let threshold = (maxlen as f64 * overshoot_ratio) as u64;
                            if length > threshold {
                                tracing::warn!(stream, length, maxlen, "stream length exceeds overshoot threshold");
                            } else {
                                tracing::debug!(stream, length, maxlen, "stream length nominal");
                            }
                        }
                        Err(e) => tracing::warn!(stream, error = %e, "stream monitor tick failed for stream"),
                    }
                }
            }
        })
    }
}
