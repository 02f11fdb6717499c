use std::path::{Path, PathBuf};

use corvus_core::types::{ChatId, GroupId};
use deadpool_sqlite::{Config, Runtime};
use rusqlite::params;

use crate::db;
use crate::error::{QueueError, Result};
use crate::types::{parse_priority, EntryStatus, QueueEntry};

/// Async-pooled persistence for queue entries. Every write goes through the
/// pool's interact-closure discipline, giving the supervisor task a single
/// serialising writer even though the pool itself allows concurrent readers.
#[derive(Clone)]
pub struct QueueStore {
    pool: deadpool_sqlite::Pool,
}

impl QueueStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QueueError::Interact(e.to_string()))?;
        }
        let pool = Config::new(path.to_string_lossy().to_string())
            .builder(Runtime::Tokio1)
            .map_err(|e| QueueError::Interact(e.to_string()))?
            .max_size(8)
            .build()
            .map_err(|e| QueueError::Interact(e.to_string()))?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let id = uuid::Uuid::new_v4();
        let url = format!("file:corvus_queue_{id}?mode=memory&cache=shared");
        let pool = Config::new(url)
            .builder(Runtime::Tokio1)
            .map_err(|e| QueueError::Interact(e.to_string()))?
            .max_size(8)
            .build()
            .map_err(|e| QueueError::Interact(e.to_string()))?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        self.pool
            .get()
            .await?
            .interact(|conn| -> Result<()> {
                db::configure_connection(conn)?;
                db::init_db(conn)
            })
            .await??;
        Ok(())
    }

    pub async fn insert(&self, entry: &QueueEntry) -> Result<()> {
        let entry = entry.clone();
        self.pool
            .get()
            .await?
            .interact(move |conn| {
                conn.execute(
                    "INSERT INTO queue_entries
                     (id, group_id, chat_id, priority, prompt, enqueued_at, status, container_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        entry.id,
                        entry.group.as_str(),
                        entry.chat.as_str(),
                        entry.priority.to_string(),
                        entry.prompt,
                        entry.enqueued_at.to_rfc3339(),
                        entry.status.to_string(),
                        entry.container_id,
                    ],
                )
            })
            .await??;
        Ok(())
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: EntryStatus,
        container_id: Option<&str>,
    ) -> Result<()> {
        let id = id.to_string();
        let status_str = status.to_string();
        let container_id = container_id.map(|s| s.to_string());
        self.pool
            .get()
            .await?
            .interact(move |conn| {
                conn.execute(
                    "UPDATE queue_entries
                     SET status = ?1, container_id = COALESCE(?2, container_id)
                     WHERE id = ?3",
                    params![status_str, container_id, id],
                )
            })
            .await??;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.pool
            .get()
            .await?
            .interact(move |conn| conn.execute("DELETE FROM queue_entries WHERE id = ?1", params![id]))
            .await??;
        Ok(())
    }

    /// Load every persisted entry, regardless of status, for startup reclaim.
    pub async fn load_all(&self) -> Result<Vec<QueueEntry>> {
        let rows = self
            .pool
            .get()
            .await?
            .interact(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, group_id, chat_id, priority, prompt, enqueued_at, status, container_id
                     FROM queue_entries",
                )?;
                let rows = stmt.query_map([], row_to_entry)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await??;
        Ok(rows)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
    let priority_str: String = row.get(3)?;
    let enqueued_at: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    Ok(QueueEntry {
        id: row.get(0)?,
        group: GroupId::new(row.get::<_, String>(1)?),
        chat: ChatId(row.get::<_, String>(2)?),
        priority: parse_priority(&priority_str),
        prompt: row.get(4)?,
        enqueued_at: chrono::DateTime::parse_from_rfc3339(&enqueued_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        status: status_str.parse().unwrap_or(EntryStatus::Waiting),
        container_id: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvus_core::types::Priority;

    #[tokio::test]
    async fn insert_then_load_all_round_trips() {
        let store = QueueStore::open_in_memory().await.unwrap();
        let entry = QueueEntry::new(
            GroupId::main(),
            ChatId::new("tg", "1"),
            Priority::High,
            "summarise this thread",
        );
        store.insert(&entry).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, entry.id);
        assert_eq!(loaded[0].priority, Priority::High);
        assert_eq!(loaded[0].status, EntryStatus::Waiting);
    }

    #[tokio::test]
    async fn update_status_then_delete() {
        let store = QueueStore::open_in_memory().await.unwrap();
        let entry = QueueEntry::new(GroupId::main(), ChatId::new("tg", "1"), Priority::Normal, "hi");
        store.insert(&entry).await.unwrap();

        store
            .update_status(&entry.id, EntryStatus::Active, Some("c-1"))
            .await
            .unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].status, EntryStatus::Active);
        assert_eq!(loaded[0].container_id.as_deref(), Some("c-1"));

        store.delete(&entry.id).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
