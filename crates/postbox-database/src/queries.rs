//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter, so the same
//! code runs on the executor thread and inside a caller-owned
//! `rusqlite::Transaction` (which derefs to `Connection`).

use crate::{
    is_unique_violation, BatchOp, DatabaseResult, DispatchedFilter, InsertStatus,
    OutboxRow, OutstandingFilter, RowKey,
};
use chrono::{DateTime, Utc};
use rusqlite::types::FromSql;
use rusqlite::{named_params, params, Connection, Row};
use tracing::debug;

const OUTBOX_COLUMNS: &str = "id, message_type, topic, created_at, delivered_at, shard, \
     expires_at, correlation_id, reply_to, content_type, partition_key, headers, \
     body_text, body_blob, body_encoding";

const INSERT_SQL: &str = "INSERT INTO outbox_messages (id, message_type, topic, created_at, delivered_at, shard, expires_at, correlation_id, reply_to, content_type, partition_key, headers, body_text, body_blob, body_encoding)
     VALUES (:id, :message_type, :topic, :created_at, :delivered_at, :shard, :expires_at, :correlation_id, :reply_to, :content_type, :partition_key, :headers, :body_text, :body_blob, :body_encoding)";

// created_at and shard are immutable once stored.
const UPSERT_SQL: &str = "INSERT INTO outbox_messages (id, message_type, topic, created_at, delivered_at, shard, expires_at, correlation_id, reply_to, content_type, partition_key, headers, body_text, body_blob, body_encoding)
     VALUES (:id, :message_type, :topic, :created_at, :delivered_at, :shard, :expires_at, :correlation_id, :reply_to, :content_type, :partition_key, :headers, :body_text, :body_blob, :body_encoding)
     ON CONFLICT(id) DO UPDATE SET
        message_type = excluded.message_type,
        topic = excluded.topic,
        delivered_at = excluded.delivered_at,
        expires_at = excluded.expires_at,
        correlation_id = excluded.correlation_id,
        reply_to = excluded.reply_to,
        content_type = excluded.content_type,
        partition_key = excluded.partition_key,
        headers = excluded.headers,
        body_text = excluded.body_text,
        body_blob = excluded.body_blob,
        body_encoding = excluded.body_encoding";

// ==========================================
// Writes
// ==========================================

/// Bind the fixed named parameter set of a row and execute `sql`.
fn execute_row(conn: &Connection, sql: &str, row: &OutboxRow) -> rusqlite::Result<usize> {
    let created_at = row.created_at.timestamp_millis();
    let delivered_at = row.delivered_at.map(|t| t.timestamp_millis());

    let mut stmt = conn.prepare_cached(sql)?;
    stmt.execute(named_params! {
        ":id": row.id,
        ":message_type": row.message_type,
        ":topic": row.topic,
        ":created_at": created_at,
        ":delivered_at": delivered_at,
        ":shard": row.shard,
        ":expires_at": row.expires_at,
        ":correlation_id": row.correlation_id,
        ":reply_to": row.reply_to,
        ":content_type": row.content_type,
        ":partition_key": row.partition_key,
        ":headers": row.headers,
        ":body_text": row.body_text,
        ":body_blob": row.body_blob,
        ":body_encoding": row.body_encoding,
    })
}

/// Insert a new outbox row.
///
/// A primary-key collision is reported as [`InsertStatus::AlreadyExists`]
/// rather than an error, so retrying an insert after an ambiguous failure
/// is safe.
pub fn insert_outbox_row(conn: &Connection, row: &OutboxRow) -> DatabaseResult<InsertStatus> {
    match execute_row(conn, INSERT_SQL, row) {
        Ok(_) => Ok(InsertStatus::Inserted),
        Err(e) if is_unique_violation(&e) => {
            debug!(id = %row.id, "Outbox row already stored");
            Ok(InsertStatus::AlreadyExists)
        }
        Err(e) => Err(e.into()),
    }
}

/// Insert or update an outbox row, keeping the stored `created_at` and `shard`.
pub fn upsert_outbox_row(conn: &Connection, row: &OutboxRow) -> DatabaseResult<()> {
    execute_row(conn, UPSERT_SQL, row)?;
    Ok(())
}

/// Delete an outbox row. Returns whether a row was removed.
pub fn delete_outbox_row(conn: &Connection, id: &str) -> DatabaseResult<bool> {
    let count = conn.execute("DELETE FROM outbox_messages WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

/// Delete rows whose `expires_at` (unix seconds) is at or before `now_secs`.
pub fn delete_expired(conn: &Connection, now_secs: i64) -> DatabaseResult<usize> {
    let count = conn.execute(
        "DELETE FROM outbox_messages WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        params![now_secs],
    )?;
    Ok(count)
}

/// Apply a list of writes atomically.
///
/// Duplicate inserts inside the batch are ignored, like [`insert_outbox_row`].
/// Returns the number of operations that changed a row.
pub fn apply_batch(conn: &Connection, ops: &[BatchOp]) -> DatabaseResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut applied = 0;

    for op in ops {
        match op {
            BatchOp::Insert(row) => {
                if insert_outbox_row(&tx, row)? == InsertStatus::Inserted {
                    applied += 1;
                }
            }
            BatchOp::Upsert(row) => {
                upsert_outbox_row(&tx, row)?;
                applied += 1;
            }
            BatchOp::Delete(id) => {
                if delete_outbox_row(&tx, id)? {
                    applied += 1;
                }
            }
        }
    }

    tx.commit()?;
    debug!(ops = ops.len(), applied, "Outbox batch committed");
    Ok(applied)
}

// ==========================================
// Reads
// ==========================================

/// Get an outbox row by ID.
pub fn get_outbox_row(conn: &Connection, id: &str) -> DatabaseResult<Option<OutboxRow>> {
    let sql = format!("SELECT {} FROM outbox_messages WHERE id = ?1", OUTBOX_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;

    match stmt.query_row(params![id], map_outbox_row) {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Get only the key columns of an outbox row.
pub fn get_outbox_summary(conn: &Connection, id: &str) -> DatabaseResult<Option<OutboxRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, message_type, topic FROM outbox_messages WHERE id = ?1",
    )?;

    match stmt.query_row(params![id], map_outbox_row) {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Undelivered rows of one shard, oldest first, resuming after `filter.after`.
pub fn list_outstanding_for_shard(
    conn: &Connection,
    filter: &OutstandingFilter,
) -> DatabaseResult<Vec<OutboxRow>> {
    let sql = format!(
        "SELECT {} FROM outbox_messages
         WHERE topic = :topic AND shard = :shard AND delivered_at IS NULL
           AND created_at <= :cutoff
           AND (:after_ts IS NULL OR created_at > :after_ts
                OR (created_at = :after_ts AND id > :after_id))
         ORDER BY created_at ASC, id ASC
         LIMIT :limit",
        OUTBOX_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let (after_ts, after_id) = split_key(filter.after.as_ref());
    let rows = stmt
        .query_map(
            named_params! {
                ":topic": filter.topic,
                ":shard": filter.shard,
                ":cutoff": filter.created_before.timestamp_millis(),
                ":after_ts": after_ts,
                ":after_id": after_id,
                ":limit": filter.limit as i64,
            },
            map_outbox_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Delivered rows of one topic in delivery order, resuming after `filter.after`.
pub fn list_dispatched_page(
    conn: &Connection,
    filter: &DispatchedFilter,
) -> DatabaseResult<Vec<OutboxRow>> {
    let sql = format!(
        "SELECT {} FROM outbox_messages
         WHERE topic = :topic AND delivered_at IS NOT NULL
           AND delivered_at >= :since
           AND (:after_ts IS NULL OR delivered_at > :after_ts
                OR (delivered_at = :after_ts AND id > :after_id))
         ORDER BY delivered_at ASC, id ASC
         LIMIT :limit",
        OUTBOX_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let (after_ts, after_id) = split_key(filter.after.as_ref());
    let rows = stmt
        .query_map(
            named_params! {
                ":topic": filter.topic,
                ":since": filter.delivered_since.timestamp_millis(),
                ":after_ts": after_ts,
                ":after_id": after_id,
                ":limit": filter.limit as i64,
            },
            map_outbox_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Total number of stored rows.
pub fn count_outbox_rows(conn: &Connection) -> DatabaseResult<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM outbox_messages", [], |row| row.get(0))?;
    Ok(count)
}

// ==========================================
// Helpers
// ==========================================

fn split_key(key: Option<&RowKey>) -> (Option<i64>, Option<&str>) {
    match key {
        Some(k) => (Some(k.timestamp.timestamp_millis()), Some(k.id.as_str())),
        None => (None, None),
    }
}

/// Read a column by name, treating a column missing from the projection as NULL.
fn column<T: FromSql>(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<T>> {
    match row.as_ref().column_index(name) {
        Ok(idx) => row.get::<_, Option<T>>(idx),
        Err(_) => Ok(None),
    }
}

/// Map a result row to an [`OutboxRow`].
///
/// Only `id`, `message_type` and `topic` are required; any other column
/// absent from the projection leaves its field empty.
fn map_outbox_row(row: &Row<'_>) -> rusqlite::Result<OutboxRow> {
    Ok(OutboxRow {
        id: row.get("id")?,
        message_type: row.get("message_type")?,
        topic: row.get("topic")?,
        created_at: column::<i64>(row, "created_at")?
            .map(parse_datetime_from_millis)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        delivered_at: column::<i64>(row, "delivered_at")?.map(parse_datetime_from_millis),
        shard: column::<u32>(row, "shard")?.unwrap_or(0),
        expires_at: column(row, "expires_at")?,
        correlation_id: column(row, "correlation_id")?,
        reply_to: column(row, "reply_to")?,
        content_type: column(row, "content_type")?,
        partition_key: column(row, "partition_key")?,
        headers: column(row, "headers")?,
        body_text: column(row, "body_text")?,
        body_blob: column(row, "body_blob")?,
        body_encoding: column(row, "body_encoding")?,
    })
}

/// Convert unix milliseconds, falling back to the epoch when out of range.
fn parse_datetime_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use chrono::TimeZone;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn row(id: &str, topic: &str, created_ms: i64, shard: u32) -> OutboxRow {
        OutboxRow {
            created_at: at(created_ms),
            shard,
            headers: Some(r#"{"k":"v"}"#.to_string()),
            body_text: Some("hello".to_string()),
            body_encoding: Some("utf8".to_string()),
            ..OutboxRow::minimal(id, "event", topic)
        }
    }

    fn outstanding(topic: &str, shard: u32, limit: usize) -> OutstandingFilter {
        OutstandingFilter {
            topic: topic.to_string(),
            shard,
            created_before: DateTime::<Utc>::MAX_UTC,
            after: None,
            limit,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = setup();
        let mut r = row("m-1", "orders", 1_000, 2);
        r.correlation_id = Some("corr".to_string());
        r.body_text = None;
        r.body_blob = Some(vec![0, 159, 146, 150]);
        r.body_encoding = Some("raw".to_string());

        assert_eq!(insert_outbox_row(&conn, &r).unwrap(), InsertStatus::Inserted);

        let loaded = get_outbox_row(&conn, "m-1").unwrap().unwrap();
        assert_eq!(loaded, r);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let conn = setup();
        assert!(get_outbox_row(&conn, "nope").unwrap().is_none());
        assert!(get_outbox_summary(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_is_already_exists() {
        let conn = setup();
        let r = row("m-1", "orders", 1_000, 0);

        assert_eq!(insert_outbox_row(&conn, &r).unwrap(), InsertStatus::Inserted);
        assert_eq!(
            insert_outbox_row(&conn, &r).unwrap(),
            InsertStatus::AlreadyExists
        );
        assert_eq!(count_outbox_rows(&conn).unwrap(), 1);
    }

    #[test]
    fn test_non_constraint_errors_propagate() {
        let conn = setup();
        conn.execute_batch("DROP TABLE outbox_messages").unwrap();
        assert!(insert_outbox_row(&conn, &row("m-1", "orders", 1, 0)).is_err());
    }

    #[test]
    fn test_summary_projection_leaves_optionals_empty() {
        let conn = setup();
        insert_outbox_row(&conn, &row("m-1", "orders", 5_000, 3)).unwrap();

        let summary = get_outbox_summary(&conn, "m-1").unwrap().unwrap();
        assert_eq!(summary, OutboxRow::minimal("m-1", "event", "orders"));
    }

    #[test]
    fn test_upsert_keeps_created_at_and_shard() {
        let conn = setup();
        insert_outbox_row(&conn, &row("m-1", "orders", 1_000, 1)).unwrap();

        let mut update = row("m-1", "orders", 9_999, 7);
        update.delivered_at = Some(at(2_000));
        upsert_outbox_row(&conn, &update).unwrap();

        let loaded = get_outbox_row(&conn, "m-1").unwrap().unwrap();
        assert_eq!(loaded.created_at, at(1_000));
        assert_eq!(loaded.shard, 1);
        assert_eq!(loaded.delivered_at, Some(at(2_000)));
    }

    #[test]
    fn test_upsert_inserts_when_absent() {
        let conn = setup();
        upsert_outbox_row(&conn, &row("m-1", "orders", 1_000, 0)).unwrap();
        assert!(get_outbox_row(&conn, "m-1").unwrap().is_some());
    }

    #[test]
    fn test_delete() {
        let conn = setup();
        insert_outbox_row(&conn, &row("m-1", "orders", 1_000, 0)).unwrap();

        assert!(delete_outbox_row(&conn, "m-1").unwrap());
        assert!(!delete_outbox_row(&conn, "m-1").unwrap());
        assert_eq!(count_outbox_rows(&conn).unwrap(), 0);
    }

    #[test]
    fn test_outstanding_filters_topic_shard_and_delivery() {
        let conn = setup();
        insert_outbox_row(&conn, &row("a", "orders", 1_000, 0)).unwrap();
        insert_outbox_row(&conn, &row("b", "orders", 2_000, 1)).unwrap();
        insert_outbox_row(&conn, &row("c", "billing", 3_000, 0)).unwrap();
        let mut delivered = row("d", "orders", 4_000, 0);
        delivered.delivered_at = Some(at(5_000));
        insert_outbox_row(&conn, &delivered).unwrap();

        let rows = list_outstanding_for_shard(&conn, &outstanding("orders", 0, 10)).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_outstanding_cutoff_and_keyset() {
        let conn = setup();
        for (id, ms) in [("a", 1_000), ("b", 1_000), ("c", 2_000), ("d", 3_000)] {
            insert_outbox_row(&conn, &row(id, "orders", ms, 0)).unwrap();
        }

        let mut filter = outstanding("orders", 0, 2);
        filter.created_before = at(2_000);
        let first = list_outstanding_for_shard(&conn, &filter).unwrap();
        assert_eq!(
            first.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        filter.after = Some(RowKey {
            timestamp: at(1_000),
            id: "b".to_string(),
        });
        let second = list_outstanding_for_shard(&conn, &filter).unwrap();
        assert_eq!(
            second.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["c"]
        );
    }

    #[test]
    fn test_dispatched_page_orders_by_delivery() {
        let conn = setup();
        for (id, delivered) in [("a", 3_000), ("b", 1_000), ("c", 2_000)] {
            let mut r = row(id, "orders", 500, 0);
            r.delivered_at = Some(at(delivered));
            insert_outbox_row(&conn, &r).unwrap();
        }
        insert_outbox_row(&conn, &row("pending", "orders", 500, 0)).unwrap();

        let mut filter = DispatchedFilter {
            topic: "orders".to_string(),
            delivered_since: at(1_500),
            after: None,
            limit: 10,
        };
        let rows = list_dispatched_page(&conn, &filter).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["c", "a"]
        );

        filter.after = Some(RowKey {
            timestamp: at(2_000),
            id: "c".to_string(),
        });
        let rest = list_dispatched_page(&conn, &filter).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "a");
    }

    #[test]
    fn test_delete_expired() {
        let conn = setup();
        let mut old = row("old", "orders", 1_000, 0);
        old.expires_at = Some(100);
        let mut fresh = row("fresh", "orders", 1_000, 0);
        fresh.expires_at = Some(10_000);
        insert_outbox_row(&conn, &old).unwrap();
        insert_outbox_row(&conn, &fresh).unwrap();
        insert_outbox_row(&conn, &row("forever", "orders", 1_000, 0)).unwrap();

        assert_eq!(delete_expired(&conn, 500).unwrap(), 1);
        assert!(get_outbox_row(&conn, "old").unwrap().is_none());
        assert_eq!(count_outbox_rows(&conn).unwrap(), 2);
    }

    #[test]
    fn test_apply_batch() {
        let conn = setup();
        insert_outbox_row(&conn, &row("existing", "orders", 1_000, 0)).unwrap();

        let mut delivered = row("existing", "orders", 1_000, 0);
        delivered.delivered_at = Some(at(3_000));

        let applied = apply_batch(
            &conn,
            &[
                BatchOp::Insert(row("new", "orders", 2_000, 0)),
                BatchOp::Insert(row("existing", "orders", 1_000, 0)),
                BatchOp::Upsert(delivered),
                BatchOp::Delete("missing".to_string()),
            ],
        )
        .unwrap();

        assert_eq!(applied, 2);
        assert_eq!(count_outbox_rows(&conn).unwrap(), 2);
        let loaded = get_outbox_row(&conn, "existing").unwrap().unwrap();
        assert_eq!(loaded.delivered_at, Some(at(3_000)));
    }

    #[test]
    fn test_insert_inside_caller_transaction_rolls_back() {
        let mut conn = setup();
        {
            let tx = conn.transaction().unwrap();
            insert_outbox_row(&tx, &row("m-1", "orders", 1_000, 0)).unwrap();
            // dropped without commit
        }
        assert_eq!(count_outbox_rows(&conn).unwrap(), 0);
    }
}
