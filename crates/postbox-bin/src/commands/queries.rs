//! Listing commands.
//!
//! Each invocation is a fresh process, so cross-topic scans (which only see
//! topics added by the running process) are not offered and a topic is
//! required.

use super::open_outbox;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use postbox_config_and_utils::{Config, Paths};
use std::time::Duration;
use tracing::debug;

/// Show one page of undelivered messages. Any page may be requested.
pub async fn outstanding(
    config: &Config,
    paths: &Paths,
    topic: &str,
    older_than_secs: u64,
    page_size: usize,
    page: u32,
    format: &OutputFormat,
) -> Result<()> {
    let outbox = open_outbox(config, paths).await?;
    let result = outbox
        .outstanding_messages(
            Duration::from_secs(older_than_secs),
            page_size,
            page,
            Some(topic),
        )
        .await?;
    output::print_page(&result, format)?;
    Ok(())
}

/// Show one page of delivered messages.
///
/// Dispatched pages must be walked in order, so earlier pages are read and
/// discarded first.
pub async fn dispatched(
    config: &Config,
    paths: &Paths,
    topic: &str,
    since_secs: Option<u64>,
    page_size: usize,
    page: u32,
    format: &OutputFormat,
) -> Result<()> {
    if page == 0 {
        bail!("Pages start at 1");
    }
    let outbox = open_outbox(config, paths).await?;
    let since = since_secs.map(Duration::from_secs).unwrap_or(Duration::MAX);

    let mut current = outbox
        .dispatched_messages(since, page_size, 1, Some(topic))
        .await?;
    while current.page_number < page {
        let Some(next) = current.next_page else {
            debug!(topic = %topic, last_page = current.page_number, "Ran out of pages");
            current.items.clear();
            current.page_number = page;
            break;
        };
        current = outbox
            .dispatched_messages(since, page_size, next, Some(topic))
            .await?;
    }

    output::print_page(&current, format)?;
    Ok(())
}
