//! Every 1s, drains up to 10 due retry entries (spec.md §4.8).

use super::{spawn_interval_worker, WorkerHandle};
use crate::message::PublishSource;
use crate::pipeline::MessagePipeline;
use crate::router::PublishRequest;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const BATCH_SIZE: usize = 10;

pub struct RetryWorker;

impl RetryWorker {
    pub fn spawn(pipeline: Arc<MessagePipeline>, interval: Duration) -> WorkerHandle {
        spawn_interval_worker("retry", interval, move || {
            let pipeline = pipeline.clone();
            async move {
                if let Err(e) = run_tick(&pipeline).await {
                    tracing::warn!(error = %e, "retry worker tick failed");
                }
            }
        })
    }
}

async fn run_tick(pipeline: &MessagePipeline) -> Result<(), crate::error::CoreError> {
    let due = pipeline.retry_scheduler().due_entries(BATCH_SIZE).await?;
    for entry in due {
        let save_result = pipeline.primary_store().save(entry.message.clone()).await;
        match save_result {
            Ok(saved) => {
                let _ = pipeline
                    .router()
                    .publish(PublishRequest::Message { message: &saved, conversation: None, source: PublishSource::Direct })
                    .await;
                pipeline.retry_scheduler().remove(&entry.entry_id).await?;
            }
            Err(store_err) => {
                let core_err: crate::error::CoreError = store_err.into();
                if entry.attempt < pipeline.retry_scheduler().max_retries() {
                    pipeline.retry_scheduler().enqueue(&entry.message, entry.attempt + 1, &core_err).await?;
                    pipeline.retry_scheduler().remove(&entry.entry_id).await?;
                    pipeline.metrics().messages_retried.fetch_add(1, Ordering::Relaxed);
                } else {
                    pipeline.dlq().add(&entry.message, &core_err, entry.attempt, true, None).await?;
                    pipeline.retry_scheduler().remove(&entry.entry_id).await?;
                    pipeline.metrics().messages_poisoned.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
    Ok(())
}
