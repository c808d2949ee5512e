//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox_messages(conn)?;
    }
    if current_version < 2 {
        migrate_v2_expiry_index(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: the outbox table and its two lookup indexes.
///
/// Timestamps are unix milliseconds; `expires_at` is unix seconds.
/// `(topic, created_at, shard)` serves outstanding scans and
/// `(topic, delivered_at)` serves dispatched scans.
fn migrate_v1_outbox_messages(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: outbox_messages");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox_messages (
            id TEXT PRIMARY KEY,
            message_type TEXT NOT NULL,
            topic TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            delivered_at INTEGER,
            shard INTEGER NOT NULL DEFAULT 0,
            expires_at INTEGER,
            correlation_id TEXT,
            reply_to TEXT,
            content_type TEXT,
            partition_key TEXT,
            headers TEXT,
            body_text TEXT,
            body_blob BLOB,
            body_encoding TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_messages_outstanding
            ON outbox_messages(topic, created_at, shard);
        CREATE INDEX IF NOT EXISTS idx_outbox_messages_dispatched
            ON outbox_messages(topic, delivered_at);
        ",
    )?;

    record_migration(conn, 1, "outbox_messages")?;
    Ok(())
}

/// V2: index for the expiry sweep.
fn migrate_v2_expiry_index(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: expiry index");

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_outbox_messages_expires_at
            ON outbox_messages(expires_at)
            WHERE expires_at IS NOT NULL;
        ",
    )?;

    record_migration(conn, 2, "expiry_index")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(conn: &Connection, sql: &str) -> Vec<String> {
        conn.prepare(sql)
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_run_successfully() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = names(
            &conn,
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        );
        assert!(tables.contains(&"outbox_messages".to_string()));
        assert!(tables.contains(&"migrations".to_string()));

        let indexes = names(
            &conn,
            "SELECT name FROM sqlite_master WHERE type='index' AND tbl_name='outbox_messages'",
        );
        assert!(indexes.contains(&"idx_outbox_messages_outstanding".to_string()));
        assert!(indexes.contains(&"idx_outbox_messages_dispatched".to_string()));
        assert!(indexes.contains(&"idx_outbox_messages_expires_at".to_string()));
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, CURRENT_VERSION as i64);
    }

    #[test]
    fn test_outbox_columns() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        // Column 1 of table_info is the name
        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(outbox_messages)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for expected in [
            "id",
            "message_type",
            "topic",
            "created_at",
            "delivered_at",
            "shard",
            "expires_at",
            "headers",
            "body_text",
            "body_blob",
            "body_encoding",
        ] {
            assert!(columns.contains(&expected.to_string()), "missing column {}", expected);
        }
    }
}
