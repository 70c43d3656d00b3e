//! Every 2s, replays up to 10 parked fallbacks into the primary store
//! (spec.md §4.8, §4.3).

use super::{spawn_interval_worker, WorkerHandle};
use crate::message::{Message, MessageStatus, MessageType, PublishSource};
use crate::pipeline::MessagePipeline;
use crate::router::PublishRequest;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const BATCH_SIZE: usize = 10;

pub struct FallbackWorker;

impl FallbackWorker {
    pub fn spawn(pipeline: Arc<MessagePipeline>, interval: Duration) -> WorkerHandle {
        spawn_interval_worker("fallback", interval, move || {
            let pipeline = pipeline.clone();
            async move {
                if let Err(e) = run_tick(&pipeline).await {
                    tracing::warn!(error = %e, "fallback worker tick failed");
                }
            }
        })
    }
}

async fn run_tick(pipeline: &MessagePipeline) -> Result<(), crate::error::CoreError> {
    let entries = pipeline.fallback_store().recent_stream_entries(BATCH_SIZE).await?;
    for (entry_id, fallback_id) in entries {
        let Some(parked) = pipeline.fallback_store().fetch(&fallback_id).await? else {
            continue;
        };

        let message_type = MessageType::from_str(&parked.message_type).unwrap_or(MessageType::Text);
        let mut msg = Message::new(parked.conversation_id.clone(), parked.sender_id.clone(), parked.content.clone(), message_type);
        msg.id = parked.original_id.clone();
        msg.receiver_id = parked.receiver_id.clone();
        msg.subtype = parked.subtype.clone();
        msg.metadata = parked.metadata.clone();
        msg.status = MessageStatus::PendingFallback;
        // Preserve the original createdAt (spec.md §5: replayed messages "preserve
        // their original createdAt"), rather than the `Message::new` default of now.
        if let Some(original) = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(parked.created_at_ms as i64) {
            msg.created_at = original;
        }

        match pipeline.primary_store().save(msg).await {
            Ok(saved) => {
                let _ = pipeline
                    .router()
                    .publish(PublishRequest::Message { message: &saved, conversation: None, source: PublishSource::FallbackReplay })
                    .await;
                pipeline.fallback_store().mark_replayed(&fallback_id).await?;
                pipeline.fallback_store().ack_stream_entry(&entry_id).await?;
            }
            Err(_) => {
                // Stays parked; a later tick retries it until its TTL lapses.
            }
        }
    }
    Ok(())
}
