//! Engine behaviour tests, organised by concern.
//!
//! Most scenarios run against both the in-memory wide-column store and the
//! SQLite store.

mod concurrency;

use crate::store::{DispatchedQuery, ShardQuery, StorePage, WriteBatch};
use crate::{
    InsertOutcome, MemoryStore, Message, MessageBody, MessageType, Outbox, OutboxError,
    OutboxMessage, OutboxResult, OutboxStore, SqliteOutboxStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postbox_config_and_utils::{OutboxSettings, PayloadMode};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn settings(num_shards: u32) -> OutboxSettings {
    OutboxSettings {
        num_shards,
        ..Default::default()
    }
}

pub(crate) fn memory_outbox(num_shards: u32) -> (Arc<MemoryStore>, Outbox) {
    let store = Arc::new(MemoryStore::new());
    let outbox = Outbox::new(store.clone(), settings(num_shards)).unwrap();
    (store, outbox)
}

/// Memory store whose reads return at most `budget` items each.
pub(crate) fn budgeted_outbox(num_shards: u32, budget: usize) -> (Arc<MemoryStore>, Outbox) {
    let store = Arc::new(MemoryStore::new().with_read_budget(budget));
    let outbox = Outbox::new(store.clone(), settings(num_shards)).unwrap();
    (store, outbox)
}

pub(crate) async fn sqlite_outbox(num_shards: u32) -> Outbox {
    let store = SqliteOutboxStore::open_in_memory(PayloadMode::Text)
        .await
        .unwrap();
    Outbox::new(Arc::new(store), settings(num_shards)).unwrap()
}

/// Both backends, for scenarios that must behave identically.
pub(crate) async fn all_backends(num_shards: u32) -> Vec<(&'static str, Outbox)> {
    vec![
        ("memory", memory_outbox(num_shards).1),
        ("memory-budget-2", budgeted_outbox(num_shards, 2).1),
        ("sqlite", sqlite_outbox(num_shards).await),
    ]
}

pub(crate) fn message(topic: &str, id: &str) -> Message {
    Message::with_id(id, topic, MessageType::Event, MessageBody::text(format!("body of {}", id)))
        .header("origin", "tests")
}

/// Add `count` messages named `<topic>-00`, `<topic>-01`, ... in order.
pub(crate) async fn add_numbered(outbox: &Outbox, topic: &str, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = format!("{}-{:02}", topic, i);
        outbox.add(message(topic, &id)).await.unwrap();
        ids.push(id);
    }
    ids
}

pub(crate) fn ids_of(items: &[OutboxMessage]) -> Vec<String> {
    items.iter().map(|m| m.id().to_string()).collect()
}

pub(crate) fn assert_created_order(items: &[OutboxMessage]) {
    for pair in items.windows(2) {
        assert!(
            (pair[0].created_at, pair[0].id()) <= (pair[1].created_at, pair[1].id()),
            "{} sorted after {}",
            pair[0].id(),
            pair[1].id()
        );
    }
}

/// Memory store with injectable faults and slow reads.
#[derive(Default)]
pub(crate) struct FaultyStore {
    pub inner: MemoryStore,
    pub failing_deletes: HashSet<String>,
    pub failing_shard: Option<u32>,
    pub slow_reads: Option<Duration>,
    pub slow_gets: Option<Duration>,
    pub reads_started: AtomicUsize,
    pub reads_finished: AtomicUsize,
}

#[async_trait]
impl OutboxStore for FaultyStore {
    async fn insert(&self, record: &OutboxMessage) -> OutboxResult<InsertOutcome> {
        self.inner.insert(record).await
    }

    async fn upsert(&self, record: &OutboxMessage) -> OutboxResult<()> {
        self.inner.upsert(record).await
    }

    async fn get(&self, id: &str) -> OutboxResult<Option<OutboxMessage>> {
        if let Some(delay) = self.slow_gets {
            tokio::time::sleep(delay).await;
        }
        self.inner.get(id).await
    }

    async fn delete(&self, id: &str) -> OutboxResult<bool> {
        if self.failing_deletes.contains(id) {
            return Err(OutboxError::Store(format!("cannot delete {}", id)));
        }
        self.inner.delete(id).await
    }

    async fn commit_batch(&self, batch: WriteBatch) -> OutboxResult<usize> {
        self.inner.commit_batch(batch).await
    }

    async fn query_outstanding(&self, query: &ShardQuery) -> OutboxResult<StorePage> {
        self.reads_started.fetch_add(1, Ordering::SeqCst);
        if self.failing_shard == Some(query.shard) {
            return Err(OutboxError::Store(format!("shard {} unavailable", query.shard)));
        }
        if let Some(delay) = self.slow_reads {
            tokio::time::sleep(delay).await;
        }
        let page = self.inner.query_outstanding(query).await;
        self.reads_finished.fetch_add(1, Ordering::SeqCst);
        page
    }

    async fn query_dispatched(&self, query: &DispatchedQuery) -> OutboxResult<StorePage> {
        self.inner.query_dispatched(query).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> OutboxResult<usize> {
        self.inner.purge_expired(now).await
    }
}
