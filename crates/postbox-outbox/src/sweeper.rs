//! Background removal of expired records.

use crate::store::{bounded, OutboxStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

/// Run `purge_expired` every `interval` on a tokio task.
///
/// The first sweep runs immediately. Each sweep is cut off after `timeout`
/// when one is set. The task runs until its handle is aborted; failures are
/// logged and retried on the next tick.
pub fn spawn_expiry_sweeper(
    store: Arc<dyn OutboxStore>,
    interval: Duration,
    timeout: Option<Duration>,
) -> JoinHandle<()> {
    let period = interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        info!(interval_ms = period.as_millis() as u64, "Starting expiry sweeper");
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match bounded(timeout, "purge_expired", store.purge_expired(Utc::now())).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Purged expired outbox records"),
                Err(e) => warn!(error = %e, "Expiry sweep failed"),
            }
        }
    })
}
