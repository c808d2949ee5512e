//! CLI command implementations.

mod messages;
mod queries;

pub use messages::{add, delete, get, mark_dispatched, purge_expired, AddRequest};
pub use queries::{dispatched, outstanding};

use anyhow::{Context, Result};
use postbox_config_and_utils::{Config, Paths};
use postbox_outbox::{Outbox, SqliteOutboxStore};
use std::sync::Arc;

/// Open the configured SQLite store and wrap it in an outbox.
pub async fn open_outbox(config: &Config, paths: &Paths) -> Result<Outbox> {
    let db_path = config.database_file(paths);
    let store = SqliteOutboxStore::open(&db_path, config.outbox.payload_mode)
        .await
        .with_context(|| format!("Failed to open outbox database at {}", db_path.display()))?;

    Ok(Outbox::new(Arc::new(store), config.outbox.clone())?)
}
