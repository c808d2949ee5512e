//! Store adapter seam.
//!
//! The engine talks to its backend only through [`OutboxStore`]. Adapters
//! translate their native signals (duplicate keys, page caps, continuation
//! markers) into the types defined here.

use crate::{OutboxError, OutboxMessage, OutboxResult, PageToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Result of an insert that may collide with an existing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with this id was already stored; nothing was written.
    AlreadyExists,
}

/// Read of undelivered records for one topic and shard, oldest first.
#[derive(Debug, Clone)]
pub struct ShardQuery {
    pub topic: String,
    pub shard: u32,
    /// Only records created at or before this instant.
    pub created_before: DateTime<Utc>,
    pub limit: usize,
    pub token: Option<PageToken>,
}

/// Read of delivered records for one topic, in delivery order.
#[derive(Debug, Clone)]
pub struct DispatchedQuery {
    pub topic: String,
    /// Only records delivered at or after this instant.
    pub delivered_since: DateTime<Utc>,
    pub limit: usize,
    pub token: Option<PageToken>,
}

/// One store read.
///
/// `next_token` is set when the read stopped because it hit its limit or
/// the backend's page cap; `None` means the result set is exhausted.
#[derive(Debug, Clone, Default)]
pub struct StorePage {
    pub items: Vec<OutboxMessage>,
    pub next_token: Option<PageToken>,
}

/// One write destined for an externally committed batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    Insert(OutboxMessage),
    Upsert(OutboxMessage),
    Delete(String),
}

/// Accepts outbox writes into a caller-owned atomic unit of work.
///
/// The engine never commits; the caller does, together with its own
/// business writes.
pub trait TransactionEnlistment {
    fn enlist(&mut self, op: WriteOperation) -> OutboxResult<()>;
}

/// Backend-agnostic list of writes, committed with [`OutboxStore::commit_batch`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    operations: Vec<WriteOperation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOperation) {
        self.operations.push(op);
    }

    pub fn operations(&self) -> &[WriteOperation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<WriteOperation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl TransactionEnlistment for WriteBatch {
    fn enlist(&mut self, op: WriteOperation) -> OutboxResult<()> {
        self.push(op);
        Ok(())
    }
}

/// Storage backend for outbox records.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new record. A duplicate id is [`InsertOutcome::AlreadyExists`].
    async fn insert(&self, record: &OutboxMessage) -> OutboxResult<InsertOutcome>;

    /// Insert or replace a record. `created_at` and `shard` of an existing
    /// record are kept.
    async fn upsert(&self, record: &OutboxMessage) -> OutboxResult<()>;

    async fn get(&self, id: &str) -> OutboxResult<Option<OutboxMessage>>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> OutboxResult<bool>;

    /// Apply every operation atomically. Returns how many changed a record.
    async fn commit_batch(&self, batch: WriteBatch) -> OutboxResult<usize>;

    async fn query_outstanding(&self, query: &ShardQuery) -> OutboxResult<StorePage>;

    async fn query_dispatched(&self, query: &DispatchedQuery) -> OutboxResult<StorePage>;

    /// Remove records whose `expires_at` is at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> OutboxResult<usize>;

    async fn health_check(&self) -> OutboxResult<()> {
        Ok(())
    }
}

/// Run one store call under an optional deadline.
pub(crate) async fn bounded<T, F>(
    timeout: Option<Duration>,
    operation: &'static str,
    call: F,
) -> OutboxResult<T>
where
    F: Future<Output = OutboxResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| OutboxError::Timeout {
                operation,
                after_ms: limit.as_millis() as u64,
            })?,
        None => call.await,
    }
}
