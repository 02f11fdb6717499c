use corvus_core::types::{CreatedBy, DocumentType, MemoryLayer};
use serde::{Deserialize, Serialize};

/// `sync_status` on a document: whether the relational row and its vector
/// entries agree. Set to `Pending` on write, flipped to `Synced` once the
/// vector upsert confirms, `Failed` after the reconciler exhausts retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Synced => write!(f, "synced"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// A knowledge document: the unit the indexer and the learn API both write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub doc_type: DocumentType,
    pub source_path: Option<String>,
    pub title: String,
    pub content: String,
    pub concepts: Vec<String>,
    pub project: Option<String>,
    pub created_by: CreatedBy,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub superseded_by: Option<String>,
    pub layer: MemoryLayer,
    pub sync_status: SyncStatus,
    /// Episodic-layer decay score; unused for other layers.
    pub decay_score: Option<f64>,
    /// Working-layer TTL; unset for every other layer.
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub access_count: u64,
    pub metadata: serde_json::Value,
}

/// A chunk of a document's content, sized to the embedder's working window.
/// `id` is deterministic: derived from `(document_id, index, content_hash)`
/// so re-chunking identical content reproduces identical ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub index: u32,
    pub total: u32,
    pub content: String,
    pub token_count: u32,
    pub embedding_model: Option<String>,
}

/// Append-only record linking a superseded document to its replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supersession {
    pub old_doc: String,
    pub new_doc: String,
    pub reason: String,
    pub at: chrono::DateTime<chrono::Utc>,
    pub by: CreatedBy,
}

/// Search mode requested by a caller of hybrid search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Lexical,
    Vector,
    Hybrid,
}

/// One candidate surfaced by hybrid search, with both component scores
/// retained so re-ranking and quality correction can inspect either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub chunk_id: Option<String>,
    pub title: String,
    pub snippet: String,
    pub doc_type: DocumentType,
    pub project: Option<String>,
    pub layer: MemoryLayer,
    pub lexical_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub final_score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    pub type_filter: Option<DocumentType>,
    pub project_filter: Option<String>,
    pub layer_filter: Option<MemoryLayer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_status_round_trips_through_display_and_from_str() {
        for s in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Failed] {
            let parsed: SyncStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn unknown_sync_status_is_rejected() {
        assert!("bogus".parse::<SyncStatus>().is_err());
    }
}
