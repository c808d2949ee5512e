//! # Observability
//!
//! Structured logging for Postbox services.
//!
//! Services call `observability::init()` once at startup and use standard
//! `tracing` macros everywhere else. Every event is written as one JSON line
//! to a log file (default `~/.postbox/logs/postbox.jsonl`), optionally
//! mirrored to stderr in compact form.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("postbox");
//!     tracing::info!("service started");
//! }
//! ```
//!
//! Or with configuration:
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "postbox".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```

mod file_writer;
mod json_layer;

use std::fmt;
use std::path::PathBuf;

pub use file_writer::{default_log_path, CentralLogWriter};
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "postbox", "dispatcher").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.postbox/logs/postbox.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Failure to install the global subscriber.
#[derive(Debug)]
pub enum InitError {
    /// The log file could not be opened.
    LogFile { path: PathBuf, source: std::io::Error },
    /// No home directory and no explicit log path.
    NoLogPath,
    /// A global subscriber was already installed.
    AlreadyInitialized(String),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogFile { path, source } => {
                write!(f, "failed to open log file {}: {}", path.display(), source)
            }
            Self::NoLogPath => write!(f, "no log path configured and no home directory"),
            Self::AlreadyInitialized(e) => write!(f, "subscriber already initialized: {}", e),
        }
    }
}

impl std::error::Error for InitError {}

/// Initialize the observability layer with default settings.
///
/// # Panics
///
/// Panics if the log file cannot be created or opened.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// # Panics
///
/// Panics if the log file cannot be opened or a subscriber is already set.
/// Use [`try_init_with_config`] to handle those cases.
pub fn init_with_config(config: LogConfig) {
    if let Err(e) = try_init_with_config(config) {
        panic!("{}", e);
    }
}

/// Fallible variant of [`init_with_config`].
pub fn try_init_with_config(config: LogConfig) -> Result<PathBuf, InitError> {
    file_writer::init_file_subscriber(&config)
}

/// Re-export tracing macros for convenience.
/// Services can use `observability::info!()` or `tracing::info!()`.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
