//! In-memory wide-column store.
//!
//! Records are keyed by id; the two secondary indexes are ordered sets, and
//! a read is capped by an optional per-read item budget the way a
//! wide-column backend caps a page. A capped read still hands back a token,
//! so callers must keep reading until the token runs out.

use crate::store::{
    DispatchedQuery, InsertOutcome, OutboxStore, ShardQuery, StorePage, WriteBatch,
    WriteOperation,
};
use crate::{OutboxMessage, OutboxResult, PageToken, ResumeKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// (topic, shard, created_at ms, id)
type OutstandingKey = (String, u32, i64, String);
/// (topic, delivered_at ms, id)
type DispatchedKey = (String, i64, String);

#[derive(Default)]
struct Tables {
    records: HashMap<String, OutboxMessage>,
    outstanding: BTreeSet<OutstandingKey>,
    dispatched: BTreeSet<DispatchedKey>,
}

impl Tables {
    fn index(&mut self, record: &OutboxMessage) {
        let topic = record.topic().to_string();
        let id = record.id().to_string();
        match record.delivered_at {
            None => {
                self.outstanding.insert((
                    topic,
                    record.shard,
                    record.created_at.timestamp_millis(),
                    id,
                ));
            }
            Some(delivered_at) => {
                self.dispatched
                    .insert((topic, delivered_at.timestamp_millis(), id));
            }
        }
    }

    fn unindex(&mut self, record: &OutboxMessage) {
        let topic = record.topic().to_string();
        let id = record.id().to_string();
        match record.delivered_at {
            None => {
                self.outstanding.remove(&(
                    topic,
                    record.shard,
                    record.created_at.timestamp_millis(),
                    id,
                ));
            }
            Some(delivered_at) => {
                self.dispatched
                    .remove(&(topic, delivered_at.timestamp_millis(), id));
            }
        }
    }

    fn insert(&mut self, record: OutboxMessage) -> InsertOutcome {
        if self.records.contains_key(record.id()) {
            return InsertOutcome::AlreadyExists;
        }
        self.index(&record);
        self.records.insert(record.id().to_string(), record);
        InsertOutcome::Inserted
    }

    fn upsert(&mut self, mut record: OutboxMessage) {
        if let Some(existing) = self.records.remove(record.id()) {
            record.created_at = existing.created_at;
            record.shard = existing.shard;
            self.unindex(&existing);
        }
        self.index(&record);
        self.records.insert(record.id().to_string(), record);
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.records.remove(id) {
            Some(existing) => {
                self.unindex(&existing);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, op: WriteOperation) -> bool {
        match op {
            WriteOperation::Insert(record) => self.insert(record) == InsertOutcome::Inserted,
            WriteOperation::Upsert(record) => {
                self.upsert(record);
                true
            }
            WriteOperation::Delete(id) => self.remove(&id),
        }
    }
}

/// Process-local [`OutboxStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    read_budget: Option<usize>,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every read at `budget` items (at least 1), regardless of its limit.
    pub fn with_read_budget(mut self, budget: usize) -> Self {
        self.read_budget = Some(budget.max(1));
        self
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.tables.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of index reads served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn cap(&self, limit: usize) -> usize {
        match self.read_budget {
            Some(budget) => limit.min(budget),
            None => limit,
        }
    }

    /// Token for the last item when the read filled its cap.
    fn continuation(
        cap: usize,
        last: Option<(i64, &str)>,
        returned: usize,
    ) -> OutboxResult<Option<PageToken>> {
        match last {
            Some((timestamp_ms, id)) if cap > 0 && returned == cap => {
                let key = ResumeKey {
                    timestamp_ms,
                    id: id.to_string(),
                };
                Ok(Some(PageToken::from_key(&key)?))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn insert(&self, record: &OutboxMessage) -> OutboxResult<InsertOutcome> {
        Ok(self.tables.write().insert(record.clone()))
    }

    async fn upsert(&self, record: &OutboxMessage) -> OutboxResult<()> {
        self.tables.write().upsert(record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> OutboxResult<Option<OutboxMessage>> {
        Ok(self.tables.read().records.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> OutboxResult<bool> {
        Ok(self.tables.write().remove(id))
    }

    async fn commit_batch(&self, batch: WriteBatch) -> OutboxResult<usize> {
        let mut tables = self.tables.write();
        let applied = batch
            .into_operations()
            .into_iter()
            .map(|op| tables.apply(op))
            .filter(|changed| *changed)
            .count();
        Ok(applied)
    }

    async fn query_outstanding(&self, query: &ShardQuery) -> OutboxResult<StorePage> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let after = query.token.as_ref().map(PageToken::to_key).transpose()?;
        let cutoff_ms = query.created_before.timestamp_millis();
        let cap = self.cap(query.limit);

        let lower = match after {
            Some(key) => Bound::Excluded((
                query.topic.clone(),
                query.shard,
                key.timestamp_ms,
                key.id,
            )),
            None => Bound::Included((query.topic.clone(), query.shard, i64::MIN, String::new())),
        };

        let tables = self.tables.read();
        let keys: Vec<&OutstandingKey> = tables
            .outstanding
            .range((lower, Bound::Unbounded))
            .take_while(|(topic, shard, created_ms, _)| {
                *topic == query.topic && *shard == query.shard && *created_ms <= cutoff_ms
            })
            .take(cap)
            .collect();

        let last = keys.last().map(|(_, _, ts, id)| (*ts, id.as_str()));
        let next_token = Self::continuation(cap, last, keys.len())?;
        let items: Vec<OutboxMessage> = keys
            .iter()
            .filter_map(|(_, _, _, id)| tables.records.get(id).cloned())
            .collect();

        debug!(
            topic = %query.topic,
            shard = query.shard,
            count = items.len(),
            more = next_token.is_some(),
            "Memory outstanding read"
        );
        Ok(StorePage { items, next_token })
    }

    async fn query_dispatched(&self, query: &DispatchedQuery) -> OutboxResult<StorePage> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let after = query.token.as_ref().map(PageToken::to_key).transpose()?;
        let cap = self.cap(query.limit);

        let lower = match after {
            Some(key) => Bound::Excluded((query.topic.clone(), key.timestamp_ms, key.id)),
            None => Bound::Included((
                query.topic.clone(),
                query.delivered_since.timestamp_millis(),
                String::new(),
            )),
        };

        let tables = self.tables.read();
        let keys: Vec<&DispatchedKey> = tables
            .dispatched
            .range((lower, Bound::Unbounded))
            .take_while(|(topic, _, _)| *topic == query.topic)
            .take(cap)
            .collect();

        let last = keys.last().map(|(_, ts, id)| (*ts, id.as_str()));
        let next_token = Self::continuation(cap, last, keys.len())?;
        let items: Vec<OutboxMessage> = keys
            .iter()
            .filter_map(|(_, _, id)| tables.records.get(id).cloned())
            .collect();

        debug!(
            topic = %query.topic,
            count = items.len(),
            more = next_token.is_some(),
            "Memory dispatched read"
        );
        Ok(StorePage { items, next_token })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> OutboxResult<usize> {
        let now_secs = now.timestamp();
        let mut tables = self.tables.write();
        let expired: Vec<String> = tables
            .records
            .values()
            .filter(|r| matches!(r.expires_at, Some(at) if at <= now_secs))
            .map(|r| r.id().to_string())
            .collect();

        for id in &expired {
            tables.remove(id);
        }
        Ok(expired.len())
    }
}
