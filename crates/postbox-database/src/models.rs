//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relational projection of one outbox record.
///
/// Headers arrive already serialized as JSON text; the body sits in either
/// `body_text` or `body_blob` depending on the payload mode of the writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: String,
    pub message_type: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub shard: u32,
    /// Unix seconds.
    pub expires_at: Option<i64>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
    pub partition_key: Option<String>,
    pub headers: Option<String>, // JSON object
    pub body_text: Option<String>,
    pub body_blob: Option<Vec<u8>>,
    pub body_encoding: Option<String>,
}

impl OutboxRow {
    /// A row with only the key columns populated.
    pub fn minimal(id: &str, message_type: &str, topic: &str) -> Self {
        Self {
            id: id.to_string(),
            message_type: message_type.to_string(),
            topic: topic.to_string(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            delivered_at: None,
            shard: 0,
            expires_at: None,
            correlation_id: None,
            reply_to: None,
            content_type: None,
            partition_key: None,
            headers: None,
            body_text: None,
            body_blob: None,
            body_encoding: None,
        }
    }
}

/// Outcome of an insert that may collide with an existing primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStatus {
    Inserted,
    AlreadyExists,
}

/// One write inside [`crate::queries::apply_batch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    Insert(OutboxRow),
    Upsert(OutboxRow),
    Delete(String),
}

/// Keyset resume position: the ordering timestamp and id of the last row
/// already returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKey {
    pub timestamp: DateTime<Utc>,
    pub id: String,
}

/// Undelivered rows of one topic and shard created at or before `created_before`.
#[derive(Debug, Clone)]
pub struct OutstandingFilter {
    pub topic: String,
    pub shard: u32,
    pub created_before: DateTime<Utc>,
    pub after: Option<RowKey>,
    pub limit: usize,
}

/// Delivered rows of one topic delivered at or after `delivered_since`.
#[derive(Debug, Clone)]
pub struct DispatchedFilter {
    pub topic: String,
    pub delivered_since: DateTime<Utc>,
    pub after: Option<RowKey>,
    pub limit: usize,
}
