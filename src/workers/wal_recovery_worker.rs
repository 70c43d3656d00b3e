//! Every 3s, scans the WAL for pre-writes older than the timeout with no
//! matching post-write (spec.md §4.8, §4.4).

use super::{spawn_interval_worker, WorkerHandle};
use crate::error::CoreError;
use crate::pipeline::MessagePipeline;
use std::sync::Arc;
use std::time::Duration;

pub struct WalRecoveryWorker;

impl WalRecoveryWorker {
    pub fn spawn(pipeline: Arc<MessagePipeline>, interval: Duration) -> WorkerHandle {
        spawn_interval_worker("wal_recovery", interval, move || {
            let pipeline = pipeline.clone();
            async move {
                if let Err(e) = run_tick(&pipeline).await {
                    tracing::warn!(error = %e, "wal recovery worker tick failed");
                }
            }
        })
    }
}

async fn run_tick(pipeline: &MessagePipeline) -> Result<(), CoreError> {
    let incomplete = pipeline.wal().scan_incomplete().await?;
    for entry in incomplete {
        let found = match &entry.message_id {
            Some(message_id) => pipeline.primary_store().find_by_id(message_id).await?.is_some(),
            None => false,
        };

        if !found {
            if let Some(message_id) = &entry.message_id {
                tracing::warn!(wal_id = %entry.wal_id, message_id = %message_id, "wal entry lost, routing to dlq");
            } else {
                tracing::warn!(wal_id = %entry.wal_id, "wal pre-write lost with no assigned message id, routing to dlq");
            }
            let mut placeholder = crate::message::Message::new(
                crate::ids::ConversationId::new(""),
                crate::ids::UserId::new(""),
                "",
                crate::message::MessageType::System,
            );
            placeholder.id = entry.message_id.clone();
            pipeline
                .dlq()
                .add(&placeholder, &CoreError::Fatal("wal entry lost".into()), 1, true, Some(&entry.wal_id))
                .await?;
        }
        pipeline.wal().clear(&entry.entry_id).await?;
    }
    Ok(())
}
