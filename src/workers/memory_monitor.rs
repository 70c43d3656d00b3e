//! Every 60s, reads backend memory usage and warns/criticals against a
//! configured cap (spec.md §4.8).

use super::{spawn_interval_worker, WorkerHandle};
use redis::aio::ConnectionManager;
use std::time::Duration;

pub struct MemoryMonitor;

impl MemoryMonitor {
    pub fn spawn(conn: ConnectionManager, limit_mb: u64, interval: Duration) -> WorkerHandle {
        spawn_interval_worker("memory_monitor", interval, move || {
            let mut conn = conn.clone();
            async move {
                match used_memory_bytes(&mut conn).await {
                    Ok(used_bytes) => {
                        let used_mb = used_bytes as f64 / (1024.0 * 1024.0);
                        let ratio = used_mb / limit_mb as f64;
                        if ratio >= 0.9 {
                            tracing::error!(used_mb, limit_mb, ratio, "memory usage critical");
                        } else if ratio >= 0.8 {
                            tracing::warn!(used_mb, limit_mb, ratio, "memory usage high");
                        } else {
                            tracing::debug!(used_mb, limit_mb, ratio, "memory usage nominal");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "memory monitor tick failed"),
                }
            }
        })
    }
}

async fn used_memory_bytes(conn: &mut ConnectionManager) -> Result<u64, redis::RedisError> {
    let info: String = redis::cmd("INFO").arg("memory").query_async(conn).await?;
    for line in info.lines() {
        if let Some(value) = line.strip_prefix("used_memory:") {
            if let Ok(bytes) = value.trim().parse() {
                return Ok(bytes);
            }
        }
    }
    Ok(0)
}
