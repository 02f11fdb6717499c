use rusqlite::Connection;

use crate::error::Result;

/// One versioned migration. `id` must be monotonically increasing and is
/// recorded in `schema_migrations` once applied; migrations never run twice.
struct Migration {
    id: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        name: "documents",
        sql: "CREATE TABLE documents (
            id              TEXT PRIMARY KEY,
            doc_type        TEXT NOT NULL,
            source_path     TEXT,
            title           TEXT NOT NULL,
            content         TEXT NOT NULL,
            concepts        TEXT NOT NULL DEFAULT '[]',
            project         TEXT,
            created_by      TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            superseded_by   TEXT,
            layer           TEXT NOT NULL,
            sync_status     TEXT NOT NULL DEFAULT 'pending',
            decay_score     REAL,
            expires_at      TEXT,
            access_count    INTEGER NOT NULL DEFAULT 0,
            metadata        TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX idx_documents_project ON documents(project);
        CREATE INDEX idx_documents_layer ON documents(layer);
        CREATE INDEX idx_documents_type ON documents(doc_type);
        CREATE INDEX idx_documents_created_by ON documents(created_by);
        CREATE INDEX idx_documents_sync_status ON documents(sync_status);",
    },
    Migration {
        id: 2,
        name: "documents_fts",
        sql: "CREATE VIRTUAL TABLE documents_fts USING fts5(
            title, content, concepts,
            content='documents', content_rowid='rowid'
        );
        CREATE TRIGGER documents_ai AFTER INSERT ON documents BEGIN
            INSERT INTO documents_fts(rowid, title, content, concepts)
            VALUES (new.rowid, new.title, new.content, new.concepts);
        END;
        CREATE TRIGGER documents_ad AFTER DELETE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, title, content, concepts)
            VALUES ('delete', old.rowid, old.title, old.content, old.concepts);
        END;
        CREATE TRIGGER documents_au AFTER UPDATE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, title, content, concepts)
            VALUES ('delete', old.rowid, old.title, old.content, old.concepts);
            INSERT INTO documents_fts(rowid, title, content, concepts)
            VALUES (new.rowid, new.title, new.content, new.concepts);
        END;",
    },
    Migration {
        id: 3,
        name: "chunks",
        sql: "CREATE TABLE chunks (
            id              TEXT PRIMARY KEY,
            document_id     TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            idx             INTEGER NOT NULL,
            total           INTEGER NOT NULL,
            content         TEXT NOT NULL,
            token_count     INTEGER NOT NULL,
            embedding_model TEXT,
            UNIQUE(document_id, idx)
        );
        CREATE INDEX idx_chunks_document ON chunks(document_id);",
    },
    Migration {
        id: 4,
        name: "supersessions",
        sql: "CREATE TABLE supersessions (
            old_doc TEXT NOT NULL,
            new_doc TEXT NOT NULL,
            reason  TEXT NOT NULL,
            at      TEXT NOT NULL,
            by      TEXT NOT NULL,
            PRIMARY KEY (old_doc, new_doc)
        );",
    },
];

/// Configure pragmas for a freshly opened connection: WAL journalling,
/// foreign keys, a generous busy timeout for write contention, and a
/// ~20 MB page cache.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=30000;
         PRAGMA synchronous=NORMAL;
         PRAGMA cache_size=-20000;",
    )
}

/// Run every migration not yet recorded in `schema_migrations`, in order,
/// each inside its own transaction. Best-effort `ALTER TABLE` outside a
/// migration is never an acceptable substitute for adding a row here.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id         INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    for migration in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE id = ?1)",
            [migration.id],
            |row| row.get(0),
        )?;
        if already_applied {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (id, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.id, migration.name, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        tracing::info!(migration = migration.name, id = migration.id, "applied knowledge schema migration");
    }

    Ok(())
}

/// Snapshot the database to `<path>.pre-migration` via `VACUUM INTO` before
/// migrations run. Best-effort: a failed backup never blocks startup.
pub fn backup_before_migration(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let backup_path = path.with_extension("db.pre-migration");
    let _ = std::fs::remove_file(&backup_path);
    let conn = Connection::open(path)?;
    conn.execute(
        "VACUUM INTO ?1",
        [backup_path.to_string_lossy().as_ref()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
    }

    #[test]
    fn documents_table_and_fts_exist_after_migration() {
        let mut conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();
        run_migrations(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO documents (id, doc_type, title, content, created_by, created_at, updated_at, layer)
             VALUES ('d1', 'learning', 'title one', 'hello world', 'manual', '2026-01-01', '2026-01-01', 'semantic')",
            [],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM documents_fts WHERE documents_fts MATCH 'hello'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[test]
    fn deleting_document_cascades_to_chunks() {
        let mut conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();
        run_migrations(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO documents (id, doc_type, title, content, created_by, created_at, updated_at, layer)
             VALUES ('d1', 'learning', 't', 'c', 'manual', '2026-01-01', '2026-01-01', 'semantic')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO chunks (id, document_id, idx, total, content, token_count)
             VALUES ('c1', 'd1', 0, 1, 'c', 1)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM documents WHERE id = 'd1'", []).unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
