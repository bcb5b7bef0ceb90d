use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simplepipe_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD, DEFAULT_MAX_TAG_LEN};

use crate::error::{PipeError, Result};

/// Process-wide tunables of the pipe engine.
///
/// Durations are serialized as integer milliseconds; fields missing from a
/// config file keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipeConfig {
    /// Incoming batch size above which a priority item triggers a resort.
    /// Also caps the number of items encoded per delivery.
    pub batch_threshold: usize,

    /// Consecutive failed deliveries that mark a session broken.
    pub max_failed_retries: u32,

    #[serde(rename = "notify_interval_ms", with = "millis")]
    pub notify_interval: Duration,

    #[serde(rename = "monitoring_interval_ms", with = "millis")]
    pub monitoring_interval: Duration,

    /// Grace between losing liveness and destruction. Sessions may override it.
    #[serde(rename = "wait_closing_ms", with = "millis")]
    pub wait_closing: Duration,

    #[serde(rename = "compound_idle_grace_ms", with = "millis")]
    pub compound_idle_grace: Duration,

    /// Check interval of the private monitor of unmanaged sessions.
    #[serde(rename = "dedicated_monitoring_interval_ms", with = "millis")]
    pub dedicated_monitoring_interval: Duration,

    /// Bounded wait of the destroy worker on its queue.
    #[serde(rename = "destroy_poll_timeout_ms", with = "millis")]
    pub destroy_poll_timeout: Duration,

    #[serde(rename = "notifier_tick_ms", with = "millis")]
    pub notifier_tick: Duration,

    #[serde(rename = "query_interval_ms", with = "millis")]
    pub query_interval: Duration,

    pub destroy_queue_capacity: usize,

    pub max_payload_size: usize,

    /// Whether transports understand the `e` (continue) status.
    pub continue_supported: bool,

    /// Start background threads: the sweep and destroy worker on the first
    /// managed session, a private monitor per unmanaged session, and the
    /// live notifier on its first watched pipe. When off, callers drive
    /// [`crate::SessionRegistry::sweep_at`],
    /// [`crate::SessionRegistry::run_pending_destroys`] and
    /// [`crate::LiveNotifier::tick_at`] themselves.
    pub background_reaper: bool,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 100,
            max_failed_retries: 3,
            notify_interval: Duration::from_secs(25),
            monitoring_interval: Duration::from_secs(10),
            wait_closing: Duration::from_secs(5),
            compound_idle_grace: Duration::from_secs(30),
            dedicated_monitoring_interval: Duration::from_secs(1),
            destroy_poll_timeout: Duration::from_secs(30),
            notifier_tick: Duration::from_secs(1),
            query_interval: Duration::from_secs(1),
            destroy_queue_capacity: 1024,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            continue_supported: false,
            background_reaper: true,
        }
    }
}

impl PipeConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| PipeError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_threshold == 0 {
            return Err(PipeError::Config("batch_threshold must be positive".into()));
        }
        if self.destroy_queue_capacity == 0 {
            return Err(PipeError::Config(
                "destroy_queue_capacity must be positive".into(),
            ));
        }
        if self.notify_interval.is_zero() || self.monitoring_interval.is_zero() {
            return Err(PipeError::Config(
                "notify and monitoring intervals must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Idle window after which a session without traffic is a candidate.
    pub fn idle_window(&self) -> Duration {
        self.notify_interval * 3
    }

    /// Grace for a dead compound slot before it is destroyed.
    pub fn slot_grace(&self, wait_closing: Duration) -> Duration {
        self.notify_interval * 3 + self.monitoring_interval + wait_closing
    }

    /// Monitor interval for unmanaged sessions; zero falls back to one second.
    pub fn dedicated_interval(&self) -> Duration {
        if self.dedicated_monitoring_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.dedicated_monitoring_interval
        }
    }

    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            max_tag_len: DEFAULT_MAX_TAG_LEN,
            continue_supported: self.continue_supported,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_tunables() {
        let config = PipeConfig::default();
        assert_eq!(config.batch_threshold, 100);
        assert_eq!(config.max_failed_retries, 3);
        assert_eq!(config.notify_interval, Duration::from_secs(25));
        assert_eq!(config.monitoring_interval, Duration::from_secs(10));
        assert_eq!(config.wait_closing, Duration::from_secs(5));
        assert_eq!(config.idle_window(), Duration::from_secs(75));
        assert_eq!(
            config.slot_grace(config.wait_closing),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            PipeConfig::from_json(r#"{"notify_interval_ms": 500, "background_reaper": false}"#)
                .unwrap();
        assert_eq!(config.notify_interval, Duration::from_millis(500));
        assert!(!config.background_reaper);
        assert_eq!(config.batch_threshold, 100);
    }

    #[test]
    fn json_round_trip_uses_millis() {
        let json = serde_json::to_value(PipeConfig::default()).unwrap();
        assert_eq!(json["wait_closing_ms"], 5000);
        assert_eq!(json["destroy_poll_timeout_ms"], 30000);
    }

    #[test]
    fn rejects_unknown_and_invalid_fields() {
        assert!(matches!(
            PipeConfig::from_json(r#"{"notify_ms": 1}"#),
            Err(PipeError::Json(_))
        ));
        assert!(matches!(
            PipeConfig::from_json(r#"{"batch_threshold": 0}"#),
            Err(PipeError::Config(_))
        ));
    }

    #[test]
    fn zero_dedicated_interval_falls_back() {
        let config = PipeConfig {
            dedicated_monitoring_interval: Duration::ZERO,
            ..PipeConfig::default()
        };
        assert_eq!(config.dedicated_interval(), Duration::from_secs(1));
    }

    #[test]
    fn frame_config_follows_pipe_config() {
        let config = PipeConfig {
            max_payload_size: 10,
            continue_supported: true,
            ..PipeConfig::default()
        };
        let frame = config.frame_config();
        assert_eq!(frame.max_payload_size, 10);
        assert!(frame.continue_supported);
    }
}
