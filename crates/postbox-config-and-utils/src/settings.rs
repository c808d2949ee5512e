//! Outbox engine settings.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on the shard count. Every outstanding read fans out to one
/// query per shard, so this also bounds read amplification.
pub const MAX_SHARDS: u32 = 20;

/// Default shard count for new configurations.
pub const DEFAULT_NUM_SHARDS: u32 = 3;

/// Default per-call store timeout.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// How a relational store persists message bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Body stored in a TEXT column. Non UTF-8 bodies are base64 encoded.
    #[default]
    Text,
    /// Body stored in a BLOB column.
    Binary,
}

impl PayloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

/// Settings consumed by the outbox engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxSettings {
    /// Number of write shards. 0 and 1 both mean a single shard.
    #[serde(default = "default_num_shards")]
    pub num_shards: u32,
    /// Optional time-to-live for stored messages, in seconds.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Body column layout for relational stores.
    #[serde(default)]
    pub payload_mode: PayloadMode,
    /// Per store call timeout in milliseconds. 0 disables the timeout.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_num_shards() -> u32 {
    DEFAULT_NUM_SHARDS
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            num_shards: DEFAULT_NUM_SHARDS,
            ttl_secs: None,
            payload_mode: PayloadMode::Text,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
        }
    }
}

impl OutboxSettings {
    /// Check the settings. Fails when the shard count exceeds [`MAX_SHARDS`].
    pub fn validate(&self) -> CoreResult<()> {
        if self.num_shards > MAX_SHARDS {
            return Err(CoreError::Config(format!(
                "num_shards must be at most {}, got {}",
                MAX_SHARDS, self.num_shards
            )));
        }
        Ok(())
    }

    /// Configured TTL, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    /// Per-call store timeout, if enabled.
    pub fn store_timeout(&self) -> Option<Duration> {
        (self.store_timeout_ms > 0).then(|| Duration::from_millis(self.store_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = OutboxSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.num_shards, DEFAULT_NUM_SHARDS);
        assert!(settings.ttl().is_none());
        assert_eq!(
            settings.store_timeout(),
            Some(Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_shard_limit() {
        let mut settings = OutboxSettings::default();
        settings.num_shards = MAX_SHARDS;
        assert!(settings.validate().is_ok());

        settings.num_shards = MAX_SHARDS + 1;
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
        assert!(err.to_string().contains("21"));
    }

    #[test]
    fn test_zero_timeout_disables() {
        let settings = OutboxSettings {
            store_timeout_ms: 0,
            ..Default::default()
        };
        assert!(settings.store_timeout().is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: OutboxSettings =
            serde_json::from_str(r#"{"ttl_secs": 3600, "payload_mode": "binary"}"#).unwrap();
        assert_eq!(settings.num_shards, DEFAULT_NUM_SHARDS);
        assert_eq!(settings.ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(settings.payload_mode, PayloadMode::Binary);
        assert_eq!(settings.store_timeout_ms, DEFAULT_STORE_TIMEOUT_MS);
    }
}
