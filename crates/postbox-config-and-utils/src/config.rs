//! Configuration management.

use crate::{CoreError, CoreResult, OutboxSettings, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// SQLite database file. Defaults to `<base>/postbox.sqlite`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Outbox engine settings.
    #[serde(default)]
    pub outbox: OutboxSettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database_path: None,
            outbox: OutboxSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from `<base>/config.json`, falling back to defaults,
    /// then apply `POSTBOX_*` environment overrides and validate.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.outbox.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `<base>/config.json`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Resolve the database file, using the configured path when set.
    pub fn database_file(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    /// Override fields from environment-style lookups.
    ///
    /// Recognised keys: `POSTBOX_LOG_LEVEL`, `POSTBOX_NUM_SHARDS`,
    /// `POSTBOX_TTL_SECS`.
    pub fn apply_env<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("POSTBOX_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(raw) = lookup("POSTBOX_NUM_SHARDS") {
            self.outbox.num_shards = raw.trim().parse().map_err(|_| {
                CoreError::Config(format!("POSTBOX_NUM_SHARDS is not a number: {}", raw))
            })?;
        }
        if let Some(raw) = lookup("POSTBOX_TTL_SECS") {
            let raw = raw.trim();
            self.outbox.ttl_secs = if raw.is_empty() {
                None
            } else {
                Some(raw.parse().map_err(|_| {
                    CoreError::Config(format!("POSTBOX_TTL_SECS is not a number: {}", raw))
                })?)
            };
        }
        Ok(())
    }
}
