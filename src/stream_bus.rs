//! Typed Redis-stream bus: the single append-only fan-out substrate every
//! other component publishes through (spec.md §4.1).

use crate::error::CoreError;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use serde_json::Value;
use std::collections::HashMap;

/// Auto-assigned Redis stream entry id (`<ms>-<seq>`).
pub type EntryId = String;

/// A single read-back entry: its id plus the field map, already decoded
/// from Redis's flat string pairs.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: HashMap<String, String>,
}

fn map_redis_err(e: RedisError) -> CoreError {
    CoreError::StreamUnavailable(e.to_string())
}

/// Coerce an arbitrary JSON value to the string Redis stores: `null` becomes
/// empty, objects/arrays are JSON-encoded, everything else uses its natural
/// string form. Applied uniformly at every `append` call site.
pub fn to_string_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Convert a caller-supplied field map into the string-valued map Redis
/// expects, running every value through [`to_string_field`].
pub fn coerce_fields(fields: &HashMap<String, Value>) -> HashMap<String, String> {
    fields.iter().map(|(k, v)| (k.clone(), to_string_field(v))).collect()
}

/// The stream bus. Wraps a `redis::aio::ConnectionManager`, which reconnects
/// transparently underneath this type — callers never see a broken pipe,
/// only a `CoreError::StreamUnavailable` if the backend is actually down.
#[derive(Clone)]
pub struct StreamBus {
    conn: ConnectionManager,
}

impl StreamBus {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Append `fields` to `stream`, then issue a best-effort approximate
    /// trim to `maxlen`. Trim errors are logged and swallowed — the append
    /// itself already succeeded and that's what the caller is waiting on.
    pub async fn append(
        &self,
        stream: &str,
        fields: &HashMap<String, String>,
        maxlen: u64,
    ) -> Result<EntryId, CoreError> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let id: String = conn.xadd(stream, "*", &pairs).await.map_err(map_redis_err)?;

        let mut conn = self.conn.clone();
        let trim_result: Result<u64, RedisError> =
            redis::cmd("XTRIM").arg(stream).arg("MAXLEN").arg("~").arg(maxlen).query_async(&mut conn).await;
        if let Err(e) = trim_result {
            tracing::warn!(stream, error = %e, "stream trim failed, continuing");
        }
        Ok(id)
    }

    pub async fn read_range(
        &self,
        stream: &str,
        from: &str,
        to: &str,
        limit: usize,
    ) -> Result<Vec<StreamEntry>, CoreError> {
        let mut conn = self.conn.clone();
        let raw: Vec<(String, HashMap<String, String>)> = redis::cmd("XRANGE")
            .arg(stream)
            .arg(from)
            .arg(to)
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(raw.into_iter().map(|(id, fields)| StreamEntry { id, fields }).collect())
    }

    /// Idempotent: `BUSYGROUP Consumer Group name already exists` is treated
    /// as success rather than an error (spec.md §4.1).
    pub async fn create_group(&self, stream: &str, group: &str, start_id: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(map_redis_err(e)),
        }
    }

    /// Reads never block longer than `block_ms` (0 = non-blocking, the
    /// spec's default).
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, CoreError> {
        let mut conn = self.conn.clone();
        let opts = redis::streams::StreamReadOptions::default().group(group, consumer).count(count).block(block_ms as usize);
        let reply: redis::streams::StreamReadReply =
            conn.xread_options(&[stream], &[">"], &opts).await.map_err(map_redis_err)?;
        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let fields: HashMap<String, String> = id
                    .map
                    .into_iter()
                    .map(|(k, v)| (k, redis::from_redis_value(&v).unwrap_or_default()))
                    .collect();
                entries.push(StreamEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }

    /// Acknowledge-by-delete: this crate's consumer groups use delete-on-success
    /// rather than `XACK` plus a separate trim, matching spec.md §5's
    /// "explicit acknowledgement (delete-on-success)".
    pub async fn delete(&self, stream: &str, entry_id: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xdel(stream, &[entry_id]).await.map_err(map_redis_err)?;
        Ok(())
    }

    pub async fn trim(&self, stream: &str, maxlen: u64) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: u64 =
            redis::cmd("XTRIM").arg(stream).arg("MAXLEN").arg("~").arg(maxlen).query_async(&mut conn).await.map_err(map_redis_err)?;
        Ok(())
    }

    pub async fn length(&self, stream: &str) -> Result<u64, CoreError> {
        let mut conn = self.conn.clone();
        conn.xlen(stream).await.map_err(map_redis_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn to_string_field_coerces_null_to_empty() {
        assert_eq!(to_string_field(&Value::Null), "");
    }

    #[test]
    fn to_string_field_json_encodes_objects() {
        let value = json!({"a": 1});
        assert_eq!(to_string_field(&value), r#"{"a":1}"#);
    }

    #[test]
    fn to_string_field_passes_strings_through() {
        assert_eq!(to_string_field(&json!("hello")), "hello");
    }

    #[test]
    fn coerce_fields_applies_to_every_value() {
        let mut fields = HashMap::new();
        fields.insert("content".to_string(), json!("hi"));
        fields.insert("meta".to_string(), Value::Null);
        let coerced = coerce_fields(&fields);
        assert_eq!(coerced.get("content"), Some(&"hi".to_string()));
        assert_eq!(coerced.get("meta"), Some(&"".to_string()));
    }
}
