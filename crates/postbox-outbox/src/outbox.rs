//! Public outbox surface.

use crate::model::{now_millis, truncate_millis};
use crate::query::QueryEngine;
use crate::store::{bounded, InsertOutcome, OutboxStore, TransactionEnlistment, WriteOperation};
use crate::sweeper::spawn_expiry_sweeper;
use crate::{Message, OutboxError, OutboxMessage, OutboxResult, Page, ShardAssigner};
use chrono::{DateTime, Utc};
use postbox_config_and_utils::OutboxSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Transactional outbox over a pluggable store.
///
/// Producers call [`Outbox::add`] (or [`Outbox::add_to_transaction`] inside
/// their own unit of work). A dispatcher polls
/// [`Outbox::outstanding_messages`], sends, then calls
/// [`Outbox::mark_dispatched`]. Marking is not atomic with sending, so a
/// message can be delivered more than once.
pub struct Outbox {
    store: Arc<dyn OutboxStore>,
    settings: OutboxSettings,
    shards: ShardAssigner,
    timeout: Option<Duration>,
    engine: QueryEngine,
}

impl Outbox {
    /// Create an outbox. Fails when the settings are invalid.
    pub fn new(store: Arc<dyn OutboxStore>, settings: OutboxSettings) -> OutboxResult<Self> {
        settings
            .validate()
            .map_err(|e| OutboxError::Configuration(e.to_string()))?;
        let shards = ShardAssigner::new(settings.num_shards)?;
        let timeout = settings.store_timeout();

        info!(
            num_shards = shards.num_shards(),
            ttl_secs = ?settings.ttl_secs,
            store_timeout_ms = settings.store_timeout_ms,
            "Outbox created"
        );

        Ok(Self {
            engine: QueryEngine::new(Arc::clone(&store), shards, timeout),
            store,
            settings,
            shards,
            timeout,
        })
    }

    pub fn config(&self) -> &OutboxSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    /// Topics written through this instance, in name order.
    pub fn known_topics(&self) -> Vec<String> {
        self.engine.registry().snapshot()
    }

    #[cfg(test)]
    pub(crate) fn open_topic_cursors(&self) -> usize {
        self.engine.open_topic_cursors()
    }

    /// Build the stored record and remember its topic.
    fn prepare(&self, message: Message) -> OutboxResult<OutboxMessage> {
        if let Some(key) = message.unstorable_header() {
            return Err(OutboxError::InvalidArgument(format!(
                "header '{}' of message {} is not a finite number",
                key, message.id
            )));
        }

        let created_at = now_millis();
        let expires_at = self.settings.ttl().map(|ttl| {
            let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
            created_at.timestamp().saturating_add(secs)
        });

        if self.engine.registry().register(&message.topic) {
            debug!(topic = %message.topic, "Registered topic");
        }

        Ok(OutboxMessage {
            shard: self.shards.assign(),
            created_at,
            delivered_at: None,
            expires_at,
            message,
        })
    }

    /// Store one message.
    ///
    /// A message whose id is already stored is left untouched and reported
    /// as [`InsertOutcome::AlreadyExists`], so retrying is safe. A header
    /// holding NaN or an infinity is rejected with
    /// [`OutboxError::InvalidArgument`].
    pub async fn add(&self, message: Message) -> OutboxResult<InsertOutcome> {
        let record = self.prepare(message)?;
        let outcome = bounded(self.timeout, "insert", self.store.insert(&record)).await?;

        match outcome {
            InsertOutcome::Inserted => debug!(
                id = %record.id(),
                topic = %record.topic(),
                shard = record.shard,
                "Message added"
            ),
            InsertOutcome::AlreadyExists => {
                warn!(id = %record.id(), "Duplicate add ignored")
            }
        }
        Ok(outcome)
    }

    /// Store messages one after another. Not atomic: a failure leaves
    /// earlier messages stored.
    pub async fn add_batch(&self, messages: Vec<Message>) -> OutboxResult<Vec<InsertOutcome>> {
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            outcomes.push(self.add(message).await?);
        }
        Ok(outcomes)
    }

    /// Enlist the insert in a caller-owned transaction. The caller commits.
    ///
    /// The topic joins [`Outbox::known_topics`] at enlistment, so it stays
    /// registered even if the caller rolls back.
    pub fn add_to_transaction(
        &self,
        message: Message,
        tx: &mut dyn TransactionEnlistment,
    ) -> OutboxResult<()> {
        let record = self.prepare(message)?;
        debug!(id = %record.id(), topic = %record.topic(), "Message enlisted");
        tx.enlist(WriteOperation::Insert(record))
    }

    /// The stored message, or `None` when absent.
    pub async fn get(&self, id: &str) -> OutboxResult<Option<OutboxMessage>> {
        bounded(self.timeout, "get", self.store.get(id)).await
    }

    /// Remove each id independently.
    ///
    /// Every id is attempted; removals already applied stay applied. Returns
    /// the number removed, or the first failure once all ids were tried.
    pub async fn delete<I, S>(&self, ids: I) -> OutboxResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed = 0;
        let mut first_error = None;

        for id in ids {
            let id = id.as_ref();
            match bounded(self.timeout, "delete", self.store.delete(id)).await {
                Ok(true) => removed += 1,
                Ok(false) => debug!(id = %id, "Delete of missing message"),
                Err(e) => {
                    warn!(id = %id, error = %e, "Delete failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Record delivery of a message at `dispatched_at` (default: now).
    pub async fn mark_dispatched(
        &self,
        id: &str,
        dispatched_at: Option<DateTime<Utc>>,
    ) -> OutboxResult<()> {
        let mut record = match self.get(id).await? {
            Some(record) => record,
            None => {
                warn!(id = %id, "Mark dispatched on missing message");
                return Err(OutboxError::MessageNotFound(id.to_string()));
            }
        };

        let delivered_at = truncate_millis(dispatched_at.unwrap_or_else(Utc::now));
        record.delivered_at = Some(delivered_at);
        bounded(self.timeout, "upsert", self.store.upsert(&record)).await?;

        debug!(id = %id, delivered_at = %delivered_at, "Message marked dispatched");
        Ok(())
    }

    /// Mark several messages, one after another, stopping at the first failure.
    pub async fn mark_dispatched_batch<S: AsRef<str>>(
        &self,
        ids: &[S],
        dispatched_at: Option<DateTime<Utc>>,
    ) -> OutboxResult<()> {
        for id in ids {
            self.mark_dispatched(id.as_ref(), dispatched_at).await?;
        }
        Ok(())
    }

    /// Page of undelivered messages created at least `older_than` ago,
    /// oldest first.
    pub async fn outstanding_messages(
        &self,
        older_than: Duration,
        page_size: usize,
        page_number: u32,
        topic: Option<&str>,
    ) -> OutboxResult<Page<OutboxMessage>> {
        self.engine
            .outstanding(older_than, page_size, page_number, topic)
            .await
    }

    /// Page of messages delivered within the last `dispatched_since`.
    ///
    /// Use `Duration::MAX` for "ever dispatched".
    pub async fn dispatched_messages(
        &self,
        dispatched_since: Duration,
        page_size: usize,
        page_number: u32,
        topic: Option<&str>,
    ) -> OutboxResult<Page<OutboxMessage>> {
        self.engine
            .dispatched(dispatched_since, page_size, page_number, topic)
            .await
    }

    /// Remove expired records now.
    pub async fn purge_expired(&self) -> OutboxResult<usize> {
        bounded(
            self.timeout,
            "purge_expired",
            self.store.purge_expired(Utc::now()),
        )
        .await
    }

    /// Periodically remove expired records until the handle is aborted.
    /// Each sweep is bounded by the store timeout.
    pub fn spawn_expiry_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        spawn_expiry_sweeper(Arc::clone(&self.store), interval, self.timeout)
    }

    pub async fn health_check(&self) -> OutboxResult<()> {
        bounded(self.timeout, "health_check", self.store.health_check()).await
    }
}
