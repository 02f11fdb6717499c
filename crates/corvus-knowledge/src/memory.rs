use corvus_core::types::{CreatedBy, DocumentType, MemoryLayer};
use rusqlite::{params, Connection, OptionalExtension};

use crate::chunking::chunk_document;
use crate::error::{KnowledgeError, Result};
use crate::pool::KnowledgePool;
use crate::types::{Chunk, Document, SyncStatus};

/// Input to the learn API: writes a document with `created_by = learn_api`.
pub struct LearnRequest {
    pub title: String,
    pub content: String,
    pub concepts: Vec<String>,
    pub project: Option<String>,
    pub layer: MemoryLayer,
    pub metadata: serde_json::Value,
}

/// Document/chunk/memory-layer persistence and the `learn` write path.
/// Vector-store and embedder synchronisation is left to the caller (the
/// indexer and search module own those network calls); this store only
/// ever touches the relational tables and leaves `sync_status = pending`
/// for the reconciler to pick up.
pub struct KnowledgeStore {
    pool: KnowledgePool,
}

impl KnowledgeStore {
    pub fn new(pool: KnowledgePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &KnowledgePool {
        &self.pool
    }

    /// `learn(title, content, concepts, project?, layer, metadata)`.
    /// Normalises `project` to `host/owner/repo`, chunks the content, and
    /// records both the document and its chunks in one transaction.
    /// Returns the new document id.
    pub async fn learn(&self, req: LearnRequest) -> Result<String> {
        let project = req.project.map(|p| normalize_project(&p));
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let content = req.content;
        let title = req.title;
        let concepts = req.concepts;
        let metadata = req.metadata;
        let layer = req.layer;
        let id_for_conn = id.clone();

        self.pool
            .interact_with_retry(move |conn| {
                insert_document_and_chunks(
                    conn,
                    &id_for_conn,
                    DocumentType::Learning,
                    &title,
                    &content,
                    &concepts,
                    project.as_deref(),
                    CreatedBy::LearnApi,
                    layer,
                    now,
                    &metadata,
                )
            })
            .await?;

        Ok(id)
    }

    /// Insert or replace a document produced by the indexer, chunking and
    /// recording it the same way `learn` does but with `created_by = indexer`.
    pub async fn upsert_indexed_document(
        &self,
        source_path: String,
        doc_type: DocumentType,
        title: String,
        content: String,
        concepts: Vec<String>,
        project: Option<String>,
        layer: MemoryLayer,
    ) -> Result<String> {
        let now = chrono::Utc::now();
        let existing_id = {
            let source_path = source_path.clone();
            self.pool
                .interact(move |conn| find_document_id_by_source(conn, &source_path))
                .await?
        };
        let id = existing_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let id_for_conn = id.clone();

        self.pool
            .interact_with_retry(move |conn| {
                insert_document_and_chunks(
                    conn,
                    &id_for_conn,
                    doc_type,
                    &title,
                    &content,
                    &concepts,
                    project.as_deref(),
                    CreatedBy::Indexer,
                    layer,
                    now,
                    &serde_json::json!({ "source_path": source_path }),
                )
            })
            .await?;

        Ok(id)
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        let id = id.to_string();
        self.pool
            .interact(move |conn| load_document(conn, &id)?.ok_or(KnowledgeError::DocumentNotFound(id.clone())))
            .await
    }

    /// Delete every document matching `doc_type`/`project`/`created_by`,
    /// optionally restricted to indexer-authored rows. The indexer's full
    /// rebuild relies on `created_by = Some(CreatedBy::Indexer)` so
    /// learn-API documents are never touched by a reindex.
    pub async fn delete_documents_where(
        &self,
        project: Option<String>,
        created_by: Option<CreatedBy>,
    ) -> Result<u64> {
        self.pool
            .interact(move |conn| {
                let mut sql = "DELETE FROM documents WHERE 1=1".to_string();
                let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(p) = &project {
                    sql.push_str(" AND project = ?");
                    bound.push(Box::new(p.clone()));
                } else {
                    sql.push_str(" AND project IS NULL");
                }
                if let Some(cb) = &created_by {
                    sql.push_str(" AND created_by = ?");
                    bound.push(Box::new(cb.to_string()));
                }
                let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
                let affected = conn.execute(&sql, params.as_slice())?;
                Ok(affected as u64)
            })
            .await
    }

    /// Delete the indexer-authored document whose `source_path` metadata
    /// matches `source_path` (tombstone reconciliation for a removed file).
    pub async fn delete_documents_where_source(&self, source_path: String, created_by: CreatedBy) -> Result<()> {
        self.pool
            .interact(move |conn| {
                conn.execute(
                    "DELETE FROM documents
                     WHERE created_by = ?1 AND json_extract(metadata, '$.source_path') = ?2",
                    params![created_by.to_string(), source_path],
                )?;
                Ok(())
            })
            .await
    }

    /// Delete every `created_by = indexer` document scoped to `project` (or
    /// project-null) whose `source_path` is not in `seen_sources`. This is
    /// the rebuild-time tombstone sweep: files removed from disk since the
    /// last rebuild lose their indexed document, but nothing authored via
    /// the learn API is ever touched.
    pub async fn delete_indexer_documents_not_in(
        &self,
        project: Option<String>,
        seen_sources: Vec<String>,
    ) -> Result<u64> {
        self.pool
            .interact(move |conn| {
                let mut stmt = if project.is_some() {
                    conn.prepare(
                        "SELECT id, json_extract(metadata, '$.source_path') FROM documents
                         WHERE created_by = 'indexer' AND project = ?1",
                    )?
                } else {
                    conn.prepare(
                        "SELECT id, json_extract(metadata, '$.source_path') FROM documents
                         WHERE created_by = 'indexer' AND project IS NULL",
                    )?
                };
                let rows: Vec<(String, Option<String>)> = if let Some(p) = &project {
                    stmt.query_map([p], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .filter_map(|r| r.ok())
                        .collect()
                } else {
                    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .filter_map(|r| r.ok())
                        .collect()
                };
                drop(stmt);

                let mut deleted = 0u64;
                for (id, source) in rows {
                    let still_present = source.as_ref().map(|s| seen_sources.contains(s)).unwrap_or(false);
                    if !still_present {
                        conn.execute("DELETE FROM documents WHERE id = ?1", [&id])?;
                        deleted += 1;
                    }
                }
                Ok(deleted)
            })
            .await
    }

    /// Mark a document's sync status, called once the vector upsert (or its
    /// retry) resolves.
    pub async fn set_sync_status(&self, id: &str, status: SyncStatus) -> Result<()> {
        let id = id.to_string();
        self.pool
            .interact(move |conn| {
                conn.execute(
                    "UPDATE documents SET sync_status = ?1 WHERE id = ?2",
                    params![status.to_string(), id],
                )?;
                Ok(())
            })
            .await
    }

    /// Documents stuck in `pending`/`failed` for the background reconciler
    /// to retry, oldest first.
    pub async fn pending_sync_documents(&self, limit: usize) -> Result<Vec<Document>> {
        self.pool
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM documents WHERE sync_status != 'synced' ORDER BY updated_at ASC LIMIT ?1",
                )?;
                let ids: Vec<String> = stmt
                    .query_map([limit as i64], |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                ids.into_iter()
                    .filter_map(|id| load_document(conn, &id).transpose())
                    .collect::<Result<Vec<_>>>()
            })
            .await
    }

    /// Record an access against a document: bumps `access_count` and, for
    /// episodic-layer entries, refreshes `decay_score`.
    pub async fn record_access(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.pool
            .interact(move |conn| {
                conn.execute(
                    "UPDATE documents SET access_count = access_count + 1 WHERE id = ?1",
                    [&id],
                )?;
                Ok(())
            })
            .await
    }

    /// Drop every working-layer document whose TTL has lapsed. Working
    /// memory is session-scoped and must never survive past `expires_at`.
    pub async fn sweep_expired_working_memory(&self) -> Result<u64> {
        self.pool
            .interact(|conn| {
                let now = chrono::Utc::now().to_rfc3339();
                let affected = conn.execute(
                    "DELETE FROM documents WHERE layer = 'working' AND expires_at IS NOT NULL AND expires_at <= ?1",
                    [now],
                )?;
                Ok(affected as u64)
            })
            .await
    }
}

/// Canonicalise a project reference to `host/owner/repo`, stripping any
/// scheme, trailing `.git`, and leading/trailing slashes.
pub fn normalize_project(raw: &str) -> String {
    let stripped = raw
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("git@")
        .replacen(':', "/", 1);
    let stripped = stripped.trim_end_matches(".git").trim_matches('/');
    stripped.to_string()
}

#[allow(clippy::too_many_arguments)]
fn insert_document_and_chunks(
    conn: &mut Connection,
    id: &str,
    doc_type: DocumentType,
    title: &str,
    content: &str,
    concepts: &[String],
    project: Option<&str>,
    created_by: CreatedBy,
    layer: MemoryLayer,
    now: chrono::DateTime<chrono::Utc>,
    metadata: &serde_json::Value,
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO documents
            (id, doc_type, title, content, concepts, project, created_by, created_at, updated_at, layer, sync_status, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            concepts = excluded.concepts,
            updated_at = excluded.updated_at,
            sync_status = 'pending',
            metadata = excluded.metadata",
        params![
            id,
            doc_type.to_string(),
            title,
            content,
            serde_json::to_string(concepts)?,
            project,
            created_by.to_string(),
            now.to_rfc3339(),
            now.to_rfc3339(),
            layer.to_string(),
            serde_json::to_string(metadata)?,
        ],
    )?;

    tx.execute("DELETE FROM chunks WHERE document_id = ?1", [id])?;
    for chunk in chunk_document(id, content, None) {
        insert_chunk(&tx, &chunk)?;
    }

    tx.commit()?;
    Ok(())
}

fn insert_chunk(conn: &Connection, chunk: &Chunk) -> Result<()> {
    conn.execute(
        "INSERT INTO chunks (id, document_id, idx, total, content, token_count, embedding_model)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            chunk.id,
            chunk.document_id,
            chunk.index,
            chunk.total,
            chunk.content,
            chunk.token_count,
            chunk.embedding_model,
        ],
    )?;
    Ok(())
}

fn find_document_id_by_source(conn: &Connection, source_path: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM documents WHERE json_extract(metadata, '$.source_path') = ?1",
        [source_path],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

fn load_document(conn: &Connection, id: &str) -> Result<Option<Document>> {
    conn.query_row(
        "SELECT id, doc_type, source_path, title, content, concepts, project, created_by,
                created_at, updated_at, superseded_by, layer, sync_status, decay_score,
                expires_at, access_count, metadata
         FROM documents WHERE id = ?1",
        [id],
        row_to_document,
    )
    .optional()
    .map_err(Into::into)
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let concepts: String = row.get(5)?;
    let metadata: String = row.get(16)?;
    Ok(Document {
        id: row.get(0)?,
        doc_type: row.get::<_, String>(1)?.parse().unwrap_or(DocumentType::Learning),
        source_path: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        concepts: serde_json::from_str(&concepts).unwrap_or_default(),
        project: row.get(6)?,
        created_by: row.get::<_, String>(7)?.parse().unwrap_or(CreatedBy::Manual),
        created_at: parse_rfc3339(&row.get::<_, String>(8)?),
        updated_at: parse_rfc3339(&row.get::<_, String>(9)?),
        superseded_by: row.get(10)?,
        layer: row.get::<_, String>(11)?.parse().unwrap_or(MemoryLayer::Semantic),
        sync_status: row.get::<_, String>(12)?.parse().unwrap_or(SyncStatus::Pending),
        decay_score: row.get(13)?,
        expires_at: row.get::<_, Option<String>>(14)?.map(|s| parse_rfc3339(&s)),
        access_count: row.get::<_, i64>(15)? as u64,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

fn parse_rfc3339(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_project_strips_scheme_and_git_suffix() {
        assert_eq!(
            normalize_project("https://github.com/owner/repo.git"),
            "github.com/owner/repo"
        );
    }

    #[test]
    fn normalize_project_handles_ssh_style_remotes() {
        assert_eq!(normalize_project("git@github.com:owner/repo.git"), "github.com/owner/repo");
    }

    #[tokio::test]
    async fn learn_then_get_document_round_trips() {
        let pool = KnowledgePool::open_in_memory().await.unwrap();
        let store = KnowledgeStore::new(pool);

        let id = store
            .learn(LearnRequest {
                title: "title one".into(),
                content: "some content about quicksort".into(),
                concepts: vec!["quicksort".into()],
                project: Some("github.com/owner/repo".into()),
                layer: MemoryLayer::Semantic,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        let doc = store.get_document(&id).await.unwrap();
        assert_eq!(doc.title, "title one");
        assert_eq!(doc.created_by, CreatedBy::LearnApi);
        assert_eq!(doc.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn rebuild_deletes_only_indexer_documents_for_the_project() {
        let pool = KnowledgePool::open_in_memory().await.unwrap();
        let store = KnowledgeStore::new(pool);

        store
            .learn(LearnRequest {
                title: "learned".into(),
                content: "hand-authored fact".into(),
                concepts: vec![],
                project: Some("github.com/owner/repo".into()),
                layer: MemoryLayer::Semantic,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        store
            .upsert_indexed_document(
                "docs/readme.md".into(),
                DocumentType::Learning,
                "readme".into(),
                "indexed content".into(),
                vec![],
                Some("github.com/owner/repo".into()),
                MemoryLayer::Semantic,
            )
            .await
            .unwrap();

        let deleted = store
            .delete_documents_where(Some("github.com/owner/repo".into()), Some(CreatedBy::Indexer))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn sweep_expired_working_memory_removes_lapsed_entries() {
        let pool = KnowledgePool::open_in_memory().await.unwrap();
        let store = KnowledgeStore::new(pool);

        let id = store
            .learn(LearnRequest {
                title: "scratch".into(),
                content: "transient note".into(),
                concepts: vec![],
                project: None,
                layer: MemoryLayer::Working,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        store
            .pool()
            .interact({
                let id = id.clone();
                move |conn| {
                    conn.execute(
                        "UPDATE documents SET expires_at = '2000-01-01T00:00:00Z' WHERE id = ?1",
                        [id],
                    )?;
                    Ok(())
                }
            })
            .await
            .unwrap();

        let removed = store.sweep_expired_working_memory().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_document(&id).await.is_err());
    }
}
