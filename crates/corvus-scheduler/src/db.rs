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

/// Initialise the `jobs` table and its index. Safe to call on every
/// startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id                   TEXT    NOT NULL PRIMARY KEY,
            name                 TEXT    NOT NULL,
            group_id             TEXT    NOT NULL,
            schedule             TEXT    NOT NULL,
            prompt               TEXT    NOT NULL,
            status               TEXT    NOT NULL DEFAULT 'pending',
            last_run             TEXT,
            next_run             TEXT,
            run_count            INTEGER NOT NULL DEFAULT 0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            max_retries          INTEGER NOT NULL DEFAULT 0,
            retry_delay_ms       INTEGER NOT NULL DEFAULT 0,
            timeout_secs         INTEGER NOT NULL DEFAULT 1800,
            created_at           TEXT    NOT NULL,
            updated_at           TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs (status, next_run);",
    )?;
    Ok(())
}
