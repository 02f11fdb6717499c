use corvus_core::types::{DocumentType, MemoryLayer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::Connection;

use crate::embedder_client::EmbedderClient;
use crate::error::Result;
use crate::pool::KnowledgePool;
use crate::ranking;
use crate::thai_tokenizer_client::ThaiTokenizerClient;
use crate::types::{SearchFilter, SearchHit, SearchMode};
use crate::vector_client::VectorStoreClient;

const CANDIDATE_LIMIT: usize = 20;
const MAX_QUERY_CHARS: usize = 500;
const MAX_EXPANDED_VARIANTS: usize = 5;

pub struct SearchQuery {
    pub text: String,
    pub mode: SearchMode,
    pub filter: SearchFilter,
    pub limit: usize,
    /// Whether the classifier expects this query to be lexical-dominant
    /// (e.g. an exact-phrase or identifier-heavy query).
    pub expected_lexical_dominant: bool,
}

/// Hybrid search over documents/chunks: lexical (FTS) + vector candidates,
/// merged, quality-corrected, re-ranked, and filtered.
pub struct SearchEngine {
    pool: KnowledgePool,
    embedder: Option<EmbedderClient>,
    vector_store: Option<VectorStoreClient>,
    tokenizer: Option<ThaiTokenizerClient>,
    fts_warned_once: AtomicBool,
}

impl SearchEngine {
    pub fn new(
        pool: KnowledgePool,
        embedder: Option<EmbedderClient>,
        vector_store: Option<VectorStoreClient>,
        tokenizer: Option<ThaiTokenizerClient>,
    ) -> Self {
        Self {
            pool,
            embedder,
            vector_store,
            tokenizer,
            fts_warned_once: AtomicBool::new(false),
        }
    }

    pub async fn search(&self, query: SearchQuery) -> Result<Vec<SearchHit>> {
        let sanitised = sanitise_query(&query.text);
        if sanitised.is_empty() {
            return Ok(Vec::new());
        }

        let expanded = self.expand_query(&sanitised).await;

        let lexical = if matches!(query.mode, SearchMode::Lexical | SearchMode::Hybrid) {
            self.lexical_candidates(&expanded).await?
        } else {
            Vec::new()
        };

        let vector = if matches!(query.mode, SearchMode::Vector | SearchMode::Hybrid) {
            self.vector_candidates(&sanitised).await?
        } else {
            Vec::new()
        };

        let merged = merge_candidates(lexical, vector);

        let (weight_lexical, weight_vector) = if matches!(query.mode, SearchMode::Hybrid) {
            let top_lexical: Vec<f32> = merged.iter().filter_map(|c| c.lexical_score).collect();
            let top_vector: Vec<f32> = merged.iter().filter_map(|c| c.vector_score).collect();
            ranking::adaptive_weights(query.expected_lexical_dominant, &top_lexical, &top_vector)
        } else if matches!(query.mode, SearchMode::Lexical) {
            (1.0, 0.0)
        } else {
            (0.0, 1.0)
        };

        let now = chrono::Utc::now();
        let mut hits = self.hydrate(merged, weight_lexical, weight_vector, now).await?;
        hits.retain(|h| filter_matches(h, &query.filter));
        hits.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(query.limit);
        Ok(hits)
    }

    /// Cross-language expansion via the tokenizer sidecar plus a trivial
    /// synonym lookup, capped at `MAX_EXPANDED_VARIANTS` variants.
    async fn expand_query(&self, sanitised: &str) -> Vec<String> {
        let mut variants = vec![sanitised.to_string()];
        if let Some(tokenizer) = &self.tokenizer {
            let tokens = tokenizer.tokenize(sanitised).await;
            let joined = tokens.join(" ");
            if joined != sanitised {
                variants.push(joined);
            }
        }
        variants.truncate(MAX_EXPANDED_VARIANTS);
        variants
    }

    async fn lexical_candidates(&self, variants: &[String]) -> Result<Vec<Candidate>> {
        let match_expr = variants.join(" OR ");
        let result = self
            .pool
            .interact(move |conn| fts_search(conn, &match_expr, CANDIDATE_LIMIT))
            .await;

        match result {
            Ok(candidates) => Ok(candidates),
            Err(e) => {
                if !self.fts_warned_once.swap(true, Ordering::Relaxed) {
                    tracing::warn!("FTS query failed, falling back to substring match: {e}");
                }
                let fallback = variants.first().cloned().unwrap_or_default();
                self.pool
                    .interact(move |conn| substring_search(conn, &fallback, CANDIDATE_LIMIT))
                    .await
            }
        }
    }

    async fn vector_candidates(&self, query: &str) -> Result<Vec<Candidate>> {
        let (Some(embedder), Some(store)) = (&self.embedder, &self.vector_store) else {
            return Ok(Vec::new());
        };
        let embedding = embedder.embed(query).await?;
        let matches = store.search(embedding, CANDIDATE_LIMIT).await?;
        Ok(matches
            .into_iter()
            .map(|m| Candidate {
                document_id: m.id,
                lexical_score: None,
                vector_score: Some(m.score),
            })
            .collect())
    }

    async fn hydrate(
        &self,
        candidates: Vec<Candidate>,
        weight_lexical: f32,
        weight_vector: f32,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<SearchHit>> {
        let ids: Vec<String> = candidates.iter().map(|c| c.document_id.clone()).collect();
        let docs = self.pool.interact(move |conn| load_documents(conn, &ids)).await?;

        let mut hits = Vec::new();
        for candidate in candidates {
            let Some(doc) = docs.get(&candidate.document_id) else {
                continue;
            };
            let recency = ranking::recency_boost(doc.updated_at, now);
            let access = ranking::access_boost(doc.access_count);
            let final_score = ranking::weighted_score(
                candidate.lexical_score,
                candidate.vector_score,
                weight_lexical,
                weight_vector,
                recency,
                access,
            );
            hits.push(SearchHit {
                document_id: doc.id.clone(),
                chunk_id: None,
                title: doc.title.clone(),
                snippet: snippet_of(&doc.content),
                doc_type: doc.doc_type,
                project: doc.project.clone(),
                layer: doc.layer,
                lexical_score: candidate.lexical_score,
                vector_score: candidate.vector_score,
                final_score,
            });
        }
        Ok(hits)
    }
}

struct Candidate {
    document_id: String,
    lexical_score: Option<f32>,
    vector_score: Option<f32>,
}

struct HydratedDoc {
    id: String,
    title: String,
    content: String,
    doc_type: DocumentType,
    project: Option<String>,
    layer: MemoryLayer,
    updated_at: chrono::DateTime<chrono::Utc>,
    access_count: u64,
}

fn merge_candidates(lexical: Vec<Candidate>, vector: Vec<Candidate>) -> Vec<Candidate> {
    let mut by_id: HashMap<String, Candidate> = HashMap::new();
    for c in lexical {
        by_id.insert(c.document_id.clone(), c);
    }
    for c in vector {
        by_id
            .entry(c.document_id.clone())
            .and_modify(|existing| existing.vector_score = c.vector_score)
            .or_insert(c);
    }
    by_id.into_values().collect()
}

/// Strip FTS metacharacters, truncate to `MAX_QUERY_CHARS`. Callers must
/// never run the raw query against FTS if this returns empty.
fn sanitise_query(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let trimmed = cleaned.trim();
    trimmed.chars().take(MAX_QUERY_CHARS).collect()
}

fn fts_search(conn: &Connection, match_expr: &str, limit: usize) -> Result<Vec<Candidate>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, bm25(documents_fts) FROM documents_fts
         JOIN documents d ON d.rowid = documents_fts.rowid
         WHERE documents_fts MATCH ?1
         ORDER BY bm25(documents_fts)
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![match_expr, limit as i64], |row| {
        let id: String = row.get(0)?;
        let raw_score: f64 = row.get(1)?;
        // bm25() is lower-is-better; invert and clamp into a 0..1-ish band
        // so it composes additively with the vector cosine score.
        let score = (1.0 / (1.0 + raw_score.abs())) as f32;
        Ok(Candidate {
            document_id: id,
            lexical_score: Some(score),
            vector_score: None,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn substring_search(conn: &Connection, needle: &str, limit: usize) -> Result<Vec<Candidate>> {
    let pattern = format!("%{needle}%");
    let mut stmt = conn.prepare(
        "SELECT id FROM documents WHERE title LIKE ?1 OR content LIKE ?1 LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![pattern, limit as i64], |row| {
        Ok(Candidate {
            document_id: row.get(0)?,
            lexical_score: Some(0.2),
            vector_score: None,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn load_documents(conn: &Connection, ids: &[String]) -> Result<HashMap<String, HydratedDoc>> {
    let mut out = HashMap::new();
    for id in ids {
        let row = conn.query_row(
            "SELECT id, title, content, doc_type, project, layer, updated_at, access_count
             FROM documents WHERE id = ?1",
            [id],
            |row| {
                Ok(HydratedDoc {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    doc_type: row.get::<_, String>(3)?.parse().unwrap_or(DocumentType::Learning),
                    project: row.get(4)?,
                    layer: row.get::<_, String>(5)?.parse().unwrap_or(MemoryLayer::Semantic),
                    updated_at: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(6)?)
                        .map(|d| d.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now()),
                    access_count: row.get::<_, i64>(7)? as u64,
                })
            },
        );
        if let Ok(doc) = row {
            out.insert(doc.id.clone(), doc);
        }
    }
    Ok(out)
}

fn snippet_of(content: &str) -> String {
    const SNIPPET_CHARS: usize = 240;
    content.chars().take(SNIPPET_CHARS).collect()
}

fn filter_matches(hit: &SearchHit, filter: &SearchFilter) -> bool {
    if let Some(t) = filter.type_filter {
        if hit.doc_type != t {
            return false;
        }
    }
    if let Some(p) = &filter.project_filter {
        if hit.project.as_deref() != Some(p.as_str()) {
            return false;
        }
    }
    if let Some(l) = filter.layer_filter {
        if hit.layer != l {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitise_query_strips_metacharacters_and_truncates() {
        let raw = "SELECT * FROM x; -- drop table".repeat(60);
        let cleaned = sanitise_query(&raw);
        assert!(cleaned.len() <= MAX_QUERY_CHARS);
        assert!(!cleaned.contains(';'));
        assert!(!cleaned.contains('*'));
    }

    #[test]
    fn sanitise_query_of_pure_metacharacters_is_empty() {
        assert_eq!(sanitise_query("***;;;---"), "");
    }

    #[test]
    fn merge_candidates_keeps_both_scores_for_overlap() {
        let lexical = vec![Candidate {
            document_id: "d1".into(),
            lexical_score: Some(0.8),
            vector_score: None,
        }];
        let vector = vec![Candidate {
            document_id: "d1".into(),
            lexical_score: None,
            vector_score: Some(0.6),
        }];
        let merged = merge_candidates(lexical, vector);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].lexical_score, Some(0.8));
        assert_eq!(merged[0].vector_score, Some(0.6));
    }

    #[tokio::test]
    async fn lexical_only_search_finds_a_learned_document() {
        use crate::memory::{KnowledgeStore, LearnRequest};

        let pool = KnowledgePool::open_in_memory().await.unwrap();
        let store = KnowledgeStore::new(pool);
        store
            .learn(LearnRequest {
                title: "sorting notes".into(),
                content: "quicksort partitions around a pivot element".into(),
                concepts: vec!["quicksort".into()],
                project: None,
                layer: MemoryLayer::Semantic,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        let engine = SearchEngine::new(store.pool().clone(), None, None, None);
        let results = engine
            .search(SearchQuery {
                text: "quicksort".into(),
                mode: SearchMode::Lexical,
                filter: SearchFilter::default(),
                limit: 10,
                expected_lexical_dominant: true,
            })
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results[0].title.contains("sorting"));
    }
}
