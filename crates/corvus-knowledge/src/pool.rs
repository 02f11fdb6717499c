use std::path::{Path, PathBuf};

use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::Connection;

use crate::db;
use crate::error::{KnowledgeError, Result};

/// Retry delays for SQLite contention backoff (100ms, 500ms, 2s).
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

fn is_contention(err: &KnowledgeError) -> bool {
    matches!(
        err,
        KnowledgeError::Database(msg) if msg.contains("database is locked") || msg.contains("SQLITE_BUSY")
    )
}

/// Pooled async access to the knowledge database. Every write goes through
/// `interact`/`interact_with_retry` so the calling task never blocks on a
/// synchronous rusqlite call.
#[derive(Clone)]
pub struct KnowledgePool {
    pool: Pool,
    path: Option<PathBuf>,
}

impl KnowledgePool {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        db::backup_before_migration(path)?;

        let cfg = Config::new(path.to_string_lossy().to_string());
        let pool = cfg
            .builder(Runtime::Tokio1)
            .map_err(|e| KnowledgeError::Database(e.to_string()))?
            .max_size(8)
            .build()
            .map_err(|e| KnowledgeError::Database(e.to_string()))?;

        let knowledge_pool = Self {
            pool,
            path: Some(path.to_path_buf()),
        };
        knowledge_pool.run_migrations().await?;
        Ok(knowledge_pool)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let uri = format!("file:corvus_knowledge_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let cfg = Config::new(uri);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .map_err(|e| KnowledgeError::Database(e.to_string()))?
            .max_size(8)
            .build()
            .map_err(|e| KnowledgeError::Database(e.to_string()))?;

        let knowledge_pool = Self { pool, path: None };
        knowledge_pool.run_migrations().await?;
        Ok(knowledge_pool)
    }

    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| {
            db::configure_connection(conn)?;
            let mut conn = conn;
            db::run_migrations(&mut conn)
        })
        .await
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure on a pooled connection off the async runtime.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.pool.get().await?;
        conn.interact(move |conn| f(conn)).await?
    }

    /// Like [`interact`](Self::interact) but retries on SQLite contention
    /// with the standard 100ms/500ms/2s backoff. The closure must be `Clone`.
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        for delay in RETRY_DELAYS {
            match self.interact(f.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if is_contention(&e) => {
                    tracing::warn!("knowledge db contention, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.interact(f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_runs_migrations() {
        let pool = KnowledgePool::open_in_memory().await.unwrap();
        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert!(count > 0);
    }

    #[tokio::test]
    async fn interact_round_trips_a_write() {
        let pool = KnowledgePool::open_in_memory().await.unwrap();
        pool.interact(|conn| {
            conn.execute(
                "INSERT INTO documents (id, doc_type, title, content, created_by, created_at, updated_at, layer)
                 VALUES ('d1', 'learning', 't', 'c', 'manual', '2026-01-01', '2026-01-01', 'semantic')",
                [],
            )
            .map_err(Into::into)
            .map(|_| ())
        })
        .await
        .unwrap();

        let title: String = pool
            .interact(|conn| {
                conn.query_row("SELECT title FROM documents WHERE id = 'd1'", [], |r| r.get(0))
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(title, "t");
    }
}
