//! SQLite schema for the document store
//!
//! Documents are kept as JSON bodies keyed by id. Secondary indexes are
//! materialized into `view_rows` inside the same transaction as the
//! document write, so a query issued after a write always sees it.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Winning revision of every document, tombstones included
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            rev TEXT NOT NULL,
            seq INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            body TEXT NOT NULL,
            history TEXT NOT NULL DEFAULT '[]'
        );

        -- Losing revisions produced by replication
        CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT NOT NULL,
            rev TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (id, rev)
        );

        -- Materialized secondary index rows
        CREATE TABLE IF NOT EXISTS view_rows (
            view TEXT NOT NULL,
            key TEXT,
            doc_id TEXT NOT NULL
        );

        -- Replication progress per remote peer
        CREATE TABLE IF NOT EXISTS checkpoints (
            peer_id TEXT PRIMARY KEY,
            pulled_seq INTEGER NOT NULL DEFAULT 0,
            pushed_seq INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_documents_seq ON documents(seq);
        CREATE INDEX IF NOT EXISTS idx_view_rows_key ON view_rows(view, key);
        CREATE INDEX IF NOT EXISTS idx_view_rows_doc ON view_rows(doc_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    // Stable identity of this replica, created once
    conn.execute(
        "INSERT OR IGNORE INTO schema_info (key, value) VALUES ('replica_id', ?)",
        [uuid::Uuid::new_v4().simple().to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Get the replica id assigned at schema creation
pub fn get_replica_id(conn: &Connection) -> Result<String> {
    conn.query_row(
        "SELECT value FROM schema_info WHERE key = 'replica_id'",
        [],
        |row| row.get(0),
    )
}

/// Highest change sequence ever assigned
///
/// Survives `destroy`, so a wiped store keeps counting upward and peers
/// holding an older checkpoint still see its new writes.
pub fn get_last_seq(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT MAX(
             COALESCE((SELECT CAST(value AS INTEGER) FROM schema_info WHERE key = 'last_seq'), 0),
             COALESCE((SELECT MAX(seq) FROM documents), 0)
         )",
        [],
        |row| row.get(0),
    )
}

/// Record the change sequence just assigned
pub fn set_last_seq(conn: &Connection, seq: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('last_seq', ?)",
        [seq.to_string()],
    )?;
    Ok(())
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
