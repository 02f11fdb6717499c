use rusqlite::Connection;

use crate::error::Result;

/// Apply the pragmas every connection in the pool should run with.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 30000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

/// Initialise the queue_entries table and its index. Safe to call on every
/// startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS queue_entries (
            id           TEXT PRIMARY KEY,
            group_id     TEXT NOT NULL,
            chat_id      TEXT NOT NULL,
            priority     TEXT NOT NULL,
            prompt       TEXT NOT NULL,
            enqueued_at  TEXT NOT NULL,
            status       TEXT NOT NULL,
            container_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_queue_group_status
            ON queue_entries(group_id, status, priority, enqueued_at);",
    )?;
    Ok(())
}
