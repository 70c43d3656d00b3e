//! Runtime configuration: every tunable named in `spec.md` §6, plus the
//! worker intervals and cache TTL tiers §4.8/§4.11 name as fixed constants.
//!
//! Construct with [`Config::builder`] for explicit values or
//! [`Config::from_env`] to layer environment variables over the defaults,
//! the way the pack's chat backends load config (see DESIGN.md).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-stream MAXLEN cap, approximate (`~`) trim semantics (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub wal_stream: u64,
    pub retry_stream: u64,
    pub fallback_stream: u64,
    pub dlq_stream: u64,
    pub messages_stream: u64,
    pub private_stream: u64,
    pub group_stream: u64,
    pub typing_stream: u64,
    pub read_receipt_stream: u64,
    pub system_stream: u64,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            wal_stream: 10_000,
            retry_stream: 5_000,
            fallback_stream: 5_000,
            dlq_stream: 1_000,
            messages_stream: 5_000,
            private_stream: 10_000,
            group_stream: 20_000,
            typing_stream: 2_000,
            read_receipt_stream: 5_000,
            system_stream: 2_000,
        }
    }
}

/// Worker tick intervals, fixed by spec.md §4.8 (not independently tunable
/// per worker beyond this one struct, to keep the supervised-loop contract
/// simple).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIntervals {
    pub retry: Duration,
    pub fallback: Duration,
    pub wal_recovery: Duration,
    pub dlq_monitor: Duration,
    pub memory_monitor: Duration,
    pub stream_monitor: Duration,
    pub metrics_reporter: Duration,
}

impl Default for WorkerIntervals {
    fn default() -> Self {
        Self {
            retry: Duration::from_secs(1),
            fallback: Duration::from_secs(2),
            wal_recovery: Duration::from_secs(3),
            dlq_monitor: Duration::from_secs(5),
            memory_monitor: Duration::from_secs(60),
            stream_monitor: Duration::from_secs(60),
            metrics_reporter: Duration::from_secs(60 * 60),
        }
    }
}

/// Everything else spec.md §6 names as a configuration variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub breaker_failure_threshold: u32,
    #[serde(with = "duration_millis")]
    pub breaker_reset: Duration,
    #[serde(with = "duration_millis")]
    pub wal_timeout: Duration,
    pub memory_limit_mb: u64,
    #[serde(with = "duration_secs")]
    pub presence_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub presence_cleanup_threshold: Duration,
    #[serde(with = "duration_secs")]
    pub room_active_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub room_idle_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub room_archived_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub fallback_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub unread_counter_ttl: Duration,
    pub dlq_alert_threshold: u64,
    pub stream_overshoot_warn_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_base_ms: 100,
            breaker_failure_threshold: 5,
            breaker_reset: Duration::from_secs(30),
            wal_timeout: Duration::from_secs(60),
            memory_limit_mb: 512,
            presence_ttl: Duration::from_secs(3600),
            presence_cleanup_threshold: Duration::from_secs(60 * 60),
            room_active_ttl: Duration::from_secs(3600),
            room_idle_ttl: Duration::from_secs(2 * 3600),
            room_archived_ttl: Duration::from_secs(24 * 3600),
            fallback_ttl: Duration::from_secs(24 * 3600),
            unread_counter_ttl: Duration::from_secs(3 * 24 * 3600),
            dlq_alert_threshold: 100,
            stream_overshoot_warn_ratio: 1.5,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Layer environment variables (prefixed `MESSAGING_CORE_`) over the
    /// defaults, e.g. `MESSAGING_CORE_MAX_RETRIES=8`.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::Environment::with_prefix("MESSAGING_CORE").try_parsing(true))
            .build()?;
        settings.try_deserialize()
    }
}

/// Fluent builder mirroring the teacher's `ResilienceStackBuilder` shape.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: ConfigOrDefault,
}

#[derive(Debug, Clone)]
struct ConfigOrDefault(Config);

impl Default for ConfigOrDefault {
    fn default() -> Self {
        Self(Config::default())
    }
}

macro_rules! builder_field {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.config.0.$name = value;
            self
        }
    };
}

impl ConfigBuilder {
    builder_field!(max_retries, u32);
    builder_field!(retry_base_ms, u64);
    builder_field!(breaker_failure_threshold, u32);
    builder_field!(breaker_reset, Duration);
    builder_field!(wal_timeout, Duration);
    builder_field!(memory_limit_mb, u64);
    builder_field!(dlq_alert_threshold, u64);

    pub fn build(self) -> Config {
        self.config.0
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.retry_base_ms, 100);
        assert_eq!(cfg.breaker_failure_threshold, 5);
        assert_eq!(cfg.wal_timeout, Duration::from_secs(60));
    }

    #[test]
    fn builder_overrides_individual_fields() {
        let cfg = Config::builder().max_retries(8).breaker_failure_threshold(3).build();
        assert_eq!(cfg.max_retries, 8);
        assert_eq!(cfg.breaker_failure_threshold, 3);
        assert_eq!(cfg.retry_base_ms, Config::default().retry_base_ms, "untouched fields keep defaults");
    }

    #[test]
    fn stream_limits_match_spec_table() {
        let limits = StreamLimits::default();
        assert_eq!(limits.wal_stream, 10_000);
        assert_eq!(limits.group_stream, 20_000);
        assert_eq!(limits.dlq_stream, 1_000);
    }

    #[test]
    fn worker_intervals_match_spec() {
        let intervals = WorkerIntervals::default();
        assert_eq!(intervals.retry, Duration::from_secs(1));
        assert_eq!(intervals.metrics_reporter, Duration::from_secs(3600));
    }
}
