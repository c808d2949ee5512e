//! Relational store adapter over SQLite.
//!
//! Records are flattened into the fixed `outbox_messages` column set:
//! headers as JSON text, the body in `body_text` or `body_blob` depending on
//! the payload mode. Queries run on the database executor thread; header
//! and body encoding happen here, before the call.

use crate::store::{
    DispatchedQuery, InsertOutcome, OutboxStore, ShardQuery, StorePage, TransactionEnlistment,
    WriteBatch, WriteOperation,
};
use crate::{
    BodyEncoding, Headers, Message, MessageBody, MessageType, OutboxMessage, OutboxResult,
    PageToken, ResumeKey,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use postbox_config_and_utils::PayloadMode;
use postbox_database::{
    queries, AsyncDatabase, BatchOp, DatabaseError, DispatchedFilter, InsertStatus, OutboxRow,
    OutstandingFilter, RowKey,
};
use std::path::Path;
use tracing::{debug, info};

const ENCODING_UTF8: &str = "utf8";
const ENCODING_BASE64: &str = "base64";
const ENCODING_RAW: &str = "raw";

/// [`OutboxStore`] backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteOutboxStore {
    db: AsyncDatabase,
    payload_mode: PayloadMode,
}

impl SqliteOutboxStore {
    pub fn new(db: AsyncDatabase, payload_mode: PayloadMode) -> Self {
        Self { db, payload_mode }
    }

    /// Open (and migrate) the database file at `path`.
    pub async fn open(path: &Path, payload_mode: PayloadMode) -> OutboxResult<Self> {
        let db = AsyncDatabase::open(path).await?;
        info!(path = %db.path(), payload_mode = payload_mode.as_str(), "Opened SQLite outbox store");
        Ok(Self::new(db, payload_mode))
    }

    pub async fn open_in_memory(payload_mode: PayloadMode) -> OutboxResult<Self> {
        let db = AsyncDatabase::open_in_memory().await?;
        Ok(Self::new(db, payload_mode))
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    pub fn payload_mode(&self) -> PayloadMode {
        self.payload_mode
    }

    /// Enlist outbox writes in a caller-owned SQLite transaction.
    ///
    /// `conn` is usually a `rusqlite::Transaction`, which derefs to a
    /// connection.
    pub fn enlistment<'t>(&self, conn: &'t rusqlite::Connection) -> SqliteEnlistment<'t> {
        SqliteEnlistment::new(conn, self.payload_mode)
    }
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn insert(&self, record: &OutboxMessage) -> OutboxResult<InsertOutcome> {
        let row = to_row(record, self.payload_mode)?;
        let status = self
            .db
            .call(move |conn| queries::insert_outbox_row(conn, &row))
            .await?;
        Ok(outcome(status))
    }

    async fn upsert(&self, record: &OutboxMessage) -> OutboxResult<()> {
        let row = to_row(record, self.payload_mode)?;
        self.db
            .call(move |conn| queries::upsert_outbox_row(conn, &row))
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> OutboxResult<Option<OutboxMessage>> {
        let id = id.to_string();
        let row = self
            .db
            .call(move |conn| queries::get_outbox_row(conn, &id))
            .await?;
        row.map(from_row).transpose()
    }

    async fn delete(&self, id: &str) -> OutboxResult<bool> {
        let id = id.to_string();
        Ok(self
            .db
            .call(move |conn| queries::delete_outbox_row(conn, &id))
            .await?)
    }

    async fn commit_batch(&self, batch: WriteBatch) -> OutboxResult<usize> {
        let ops = batch
            .into_operations()
            .into_iter()
            .map(|op| batch_op(op, self.payload_mode))
            .collect::<OutboxResult<Vec<_>>>()?;

        let applied = self
            .db
            .call(move |conn| queries::apply_batch(conn, &ops))
            .await?;
        Ok(applied)
    }

    async fn query_outstanding(&self, query: &ShardQuery) -> OutboxResult<StorePage> {
        let filter = OutstandingFilter {
            topic: query.topic.clone(),
            shard: query.shard,
            created_before: query.created_before,
            after: row_key(query.token.as_ref())?,
            limit: query.limit,
        };
        let limit = filter.limit;

        let rows = self
            .db
            .call(move |conn| queries::list_outstanding_for_shard(conn, &filter))
            .await?;

        let next_token = continuation(limit, rows.last().map(|r| (r.created_at, r.id.as_str())))
            .filter(|_| rows.len() == limit)
            .map(|key| PageToken::from_key(&key))
            .transpose()?;
        let items = rows.into_iter().map(from_row).collect::<OutboxResult<Vec<_>>>()?;

        debug!(
            topic = %query.topic,
            shard = query.shard,
            count = items.len(),
            more = next_token.is_some(),
            "SQLite outstanding read"
        );
        Ok(StorePage { items, next_token })
    }

    async fn query_dispatched(&self, query: &DispatchedQuery) -> OutboxResult<StorePage> {
        let filter = DispatchedFilter {
            topic: query.topic.clone(),
            delivered_since: query.delivered_since,
            after: row_key(query.token.as_ref())?,
            limit: query.limit,
        };
        let limit = filter.limit;

        let rows = self
            .db
            .call(move |conn| queries::list_dispatched_page(conn, &filter))
            .await?;

        let last = rows
            .last()
            .and_then(|r| r.delivered_at.map(|at| (at, r.id.as_str())));
        let next_token = continuation(limit, last)
            .filter(|_| rows.len() == limit)
            .map(|key| PageToken::from_key(&key))
            .transpose()?;
        let items = rows.into_iter().map(from_row).collect::<OutboxResult<Vec<_>>>()?;

        debug!(
            topic = %query.topic,
            count = items.len(),
            more = next_token.is_some(),
            "SQLite dispatched read"
        );
        Ok(StorePage { items, next_token })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> OutboxResult<usize> {
        let now_secs = now.timestamp();
        Ok(self
            .db
            .call(move |conn| queries::delete_expired(conn, now_secs))
            .await?)
    }

    async fn health_check(&self) -> OutboxResult<()> {
        Ok(self.db.health_check().await?)
    }
}

/// Enlists outbox writes in a caller-owned SQLite transaction.
///
/// Each enlisted write executes immediately inside that transaction and
/// becomes durable only when the caller commits.
pub struct SqliteEnlistment<'t> {
    conn: &'t rusqlite::Connection,
    payload_mode: PayloadMode,
}

impl<'t> SqliteEnlistment<'t> {
    pub fn new(conn: &'t rusqlite::Connection, payload_mode: PayloadMode) -> Self {
        Self { conn, payload_mode }
    }
}

impl TransactionEnlistment for SqliteEnlistment<'_> {
    fn enlist(&mut self, op: WriteOperation) -> OutboxResult<()> {
        match batch_op(op, self.payload_mode)? {
            BatchOp::Insert(row) => {
                queries::insert_outbox_row(self.conn, &row)?;
            }
            BatchOp::Upsert(row) => queries::upsert_outbox_row(self.conn, &row)?,
            BatchOp::Delete(id) => {
                queries::delete_outbox_row(self.conn, &id)?;
            }
        }
        Ok(())
    }
}

fn outcome(status: InsertStatus) -> InsertOutcome {
    match status {
        InsertStatus::Inserted => InsertOutcome::Inserted,
        InsertStatus::AlreadyExists => InsertOutcome::AlreadyExists,
    }
}

fn batch_op(op: WriteOperation, mode: PayloadMode) -> OutboxResult<BatchOp> {
    Ok(match op {
        WriteOperation::Insert(record) => BatchOp::Insert(to_row(&record, mode)?),
        WriteOperation::Upsert(record) => BatchOp::Upsert(to_row(&record, mode)?),
        WriteOperation::Delete(id) => BatchOp::Delete(id),
    })
}

fn row_key(token: Option<&PageToken>) -> OutboxResult<Option<RowKey>> {
    let Some(token) = token else {
        return Ok(None);
    };
    let key = token.to_key()?;
    Ok(Some(RowKey {
        timestamp: key.timestamp(),
        id: key.id,
    }))
}

fn continuation(limit: usize, last: Option<(DateTime<Utc>, &str)>) -> Option<ResumeKey> {
    if limit == 0 {
        return None;
    }
    last.map(|(at, id)| ResumeKey::new(at, id))
}

/// Flatten a record into its column set.
pub(crate) fn to_row(record: &OutboxMessage, mode: PayloadMode) -> OutboxResult<OutboxRow> {
    let message = &record.message;
    let headers = if message.headers.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&message.headers)?)
    };

    let body = &message.body;
    let (body_text, body_blob, body_encoding) = match mode {
        PayloadMode::Text => match (body.encoding(), body.as_text()) {
            (BodyEncoding::Utf8, Some(text)) => {
                (Some(text.to_string()), None, ENCODING_UTF8)
            }
            _ => (Some(BASE64.encode(body.bytes())), None, ENCODING_BASE64),
        },
        PayloadMode::Binary => {
            let tag = match body.encoding() {
                BodyEncoding::Utf8 => ENCODING_UTF8,
                BodyEncoding::Raw => ENCODING_RAW,
            };
            (None, Some(body.bytes().to_vec()), tag)
        }
    };

    Ok(OutboxRow {
        id: message.id.clone(),
        message_type: message.message_type.as_str().to_string(),
        topic: message.topic.clone(),
        created_at: record.created_at,
        delivered_at: record.delivered_at,
        shard: record.shard,
        expires_at: record.expires_at,
        correlation_id: message.correlation_id.clone(),
        reply_to: message.reply_to.clone(),
        content_type: message.content_type.clone(),
        partition_key: message.partition_key.clone(),
        headers,
        body_text,
        body_blob,
        body_encoding: Some(body_encoding.to_string()),
    })
}

/// Rebuild a record from its columns. Missing columns leave fields empty.
pub(crate) fn from_row(row: OutboxRow) -> OutboxResult<OutboxMessage> {
    let headers: Headers = match row.headers.as_deref() {
        Some(json) if !json.trim().is_empty() => serde_json::from_str(json)?,
        _ => Headers::new(),
    };

    let encoding = row.body_encoding.as_deref().unwrap_or(ENCODING_UTF8);
    let body = match (row.body_text, row.body_blob) {
        (Some(text), _) if encoding == ENCODING_BASE64 => {
            let bytes = BASE64.decode(text.as_bytes()).map_err(|e| {
                DatabaseError::InvalidData(format!("body of {} is not base64: {}", row.id, e))
            })?;
            MessageBody::binary(bytes)
        }
        (Some(text), _) => MessageBody::text(text),
        (None, Some(bytes)) if encoding == ENCODING_UTF8 => match String::from_utf8(bytes) {
            Ok(text) => MessageBody::text(text),
            Err(e) => MessageBody::binary(e.into_bytes()),
        },
        (None, Some(bytes)) => MessageBody::binary(bytes),
        (None, None) => MessageBody::default(),
    };

    Ok(OutboxMessage {
        message: Message {
            id: row.id,
            topic: row.topic,
            message_type: row.message_type.parse().unwrap_or_default(),
            headers,
            body,
            correlation_id: row.correlation_id,
            reply_to: row.reply_to,
            partition_key: row.partition_key,
            content_type: row.content_type,
        },
        created_at: row.created_at,
        delivered_at: row.delivered_at,
        shard: row.shard,
        expires_at: row.expires_at,
    })
}
