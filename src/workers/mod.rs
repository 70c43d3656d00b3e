//! Supervised background workers (spec.md §4.8). Each worker is a
//! `tokio::spawn`-ed cooperative loop: `tokio::time::interval` ticks drive a
//! single-flight body, and a broadcast shutdown signal lets every worker
//! exit at its next yield point without dropping in-flight work.

mod dlq_monitor;
mod fallback_worker;
mod memory_monitor;
mod metrics_reporter;
mod retry_worker;
mod stream_monitor;
mod wal_recovery_worker;

pub use dlq_monitor::DlqMonitor;
pub use fallback_worker::FallbackWorker;
pub use memory_monitor::MemoryMonitor;
pub use metrics_reporter::{MetricsCounters, MetricsReporter};
pub use retry_worker::RetryWorker;
pub use stream_monitor::StreamMonitor;
pub use wal_recovery_worker::WalRecoveryWorker;

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A running worker: `shutdown()` signals cooperative exit, `join` awaits
/// its task handle.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }
}

/// Spawn a cooperative interval loop running `tick_fn` once per `interval`,
/// never starting the next tick until the previous one's future resolves.
pub(crate) fn spawn_interval_worker<F, Fut>(name: &'static str, interval: Duration, mut tick_fn: F) -> WorkerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick_fn().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(worker = name, "shutting down");
                        break;
                    }
                }
            }
        }
    });
    WorkerHandle { shutdown_tx, task }
}
