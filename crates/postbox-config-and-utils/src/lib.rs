//! Configuration, paths, errors, and logging setup shared by Postbox crates.

mod config;
mod error;
mod logging;
mod paths;
mod settings;

pub use config::{Config, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
pub use settings::{
    OutboxSettings, PayloadMode, DEFAULT_NUM_SHARDS, DEFAULT_STORE_TIMEOUT_MS, MAX_SHARDS,
};
