use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use corvus_core::types::{CreatedBy, DocumentType, MemoryLayer};
use notify::Watcher;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::memory::KnowledgeStore;

/// Front matter parsed from the `---`-delimited header of a knowledge file.
#[derive(Debug, Default)]
struct FrontMatter {
    doc_type: Option<String>,
    project: Option<String>,
    layer: Option<String>,
    concepts: Vec<String>,
}

/// Parses a leading `key: value` front-matter block (terminated by a line
/// that is exactly `---`) off the top of `raw`. Returns the parsed header
/// and the remaining body. Absent front matter yields defaults and the
/// whole file as body.
fn parse_front_matter(raw: &str) -> (FrontMatter, &str) {
    let Some(rest) = raw.strip_prefix("---\n") else {
        return (FrontMatter::default(), raw);
    };
    let Some(end) = rest.find("\n---\n") else {
        return (FrontMatter::default(), raw);
    };
    let header = &rest[..end];
    let body = &rest[end + 5..];

    let mut fm = FrontMatter::default();
    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "type" => fm.doc_type = Some(value.to_string()),
            "project" => fm.project = Some(value.to_string()),
            "layer" => fm.layer = Some(value.to_string()),
            "concepts" => {
                fm.concepts = value
                    .trim_matches(|c| c == '[' || c == ']')
                    .split(',')
                    .map(|s| s.trim().trim_matches('"').to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            _ => {}
        }
    }
    (fm, body)
}

/// Reacts to filesystem changes under the knowledge root: parses front
/// matter, chunks, and upserts the document. A full rebuild only ever
/// deletes `created_by = indexer` documents scoped to the touched project
/// (or project-null) — learn-API documents are untouched.
pub struct Indexer {
    root: PathBuf,
    store: Arc<KnowledgeStore>,
    default_project: Option<String>,
}

impl Indexer {
    pub fn new(root: PathBuf, store: Arc<KnowledgeStore>, default_project: Option<String>) -> Self {
        Self {
            root,
            store,
            default_project,
        }
    }

    /// Index (or re-index) a single file by reading, parsing front matter,
    /// and upserting a document. Returns the document id.
    pub async fn index_file(&self, path: &Path) -> Result<String> {
        let content = tokio::fs::read_to_string(path).await?;
        let (front_matter, body) = parse_front_matter(&content);

        let doc_type: DocumentType = front_matter
            .doc_type
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DocumentType::Learning);
        let layer: MemoryLayer = front_matter
            .layer
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(MemoryLayer::Semantic);
        let project = front_matter.project.or_else(|| self.default_project.clone());
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        let source_path = path_relative_to(&self.root, path);

        self.store
            .upsert_indexed_document(
                source_path,
                doc_type,
                title,
                body.to_string(),
                front_matter.concepts,
                project,
                layer,
            )
            .await
    }

    /// Delete the indexer-authored document backed by a file that has been
    /// removed from disk (tombstone reconciliation).
    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        let source_path = path_relative_to(&self.root, path);
        self.store
            .delete_documents_where_source(source_path, CreatedBy::Indexer)
            .await
    }

    /// Walk every file under the root and index it, then delete any
    /// indexer-authored document for `project` whose source file no longer
    /// exists under the root (the rebuild tombstone pass).
    pub async fn full_rebuild(&self, project: Option<String>) -> Result<RebuildStats> {
        let mut seen_sources = Vec::new();
        let mut indexed = 0u64;
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                self.index_file(&path).await?;
                seen_sources.push(path_relative_to(&self.root, &path));
                indexed += 1;
            }
        }

        let deleted = self
            .store
            .delete_indexer_documents_not_in(project, seen_sources)
            .await?;

        Ok(RebuildStats { indexed, deleted })
    }

    /// Spawn a background task that watches the knowledge root and indexes
    /// files as they change, debounced by 300ms so a burst of saves from an
    /// editor collapses into one re-index.
    pub fn spawn_watcher(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel::<DebounceEventResult>(256);
            let mut debouncer = match new_debouncer(Duration::from_millis(300), None, move |result| {
                let _ = tx.blocking_send(result);
            }) {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!("failed to create knowledge watcher: {e}");
                    return;
                }
            };

            if let Err(e) = debouncer.watcher().watch(&self.root, notify::RecursiveMode::Recursive) {
                tracing::error!("failed to watch knowledge root {:?}: {e}", self.root);
                return;
            }

            while let Some(result) = rx.recv().await {
                match result {
                    Ok(events) => {
                        for event in events {
                            for path in &event.event.paths {
                                if path.is_file() {
                                    if let Err(e) = self.index_file(path).await {
                                        tracing::warn!("failed to index {:?}: {e}", path);
                                    }
                                } else if let Err(e) = self.remove_file(path).await {
                                    tracing::warn!("failed to remove tombstoned doc for {:?}: {e}", path);
                                }
                            }
                        }
                    }
                    Err(errors) => {
                        for e in errors {
                            tracing::warn!("knowledge watcher error: {e:?}");
                        }
                    }
                }
            }
        })
    }
}

pub struct RebuildStats {
    pub indexed: u64,
    pub deleted: u64,
}

fn path_relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_matter_is_parsed_from_header_block() {
        let raw = "---\ntype: decision\nproject: github.com/owner/repo\nlayer: semantic\nconcepts: [quicksort, sorting]\n---\nbody text here";
        let (fm, body) = parse_front_matter(raw);
        assert_eq!(fm.doc_type.as_deref(), Some("decision"));
        assert_eq!(fm.project.as_deref(), Some("github.com/owner/repo"));
        assert_eq!(fm.layer.as_deref(), Some("semantic"));
        assert_eq!(fm.concepts, vec!["quicksort", "sorting"]);
        assert_eq!(body, "body text here");
    }

    #[test]
    fn missing_front_matter_yields_defaults_and_whole_file_as_body() {
        let raw = "just some plain content\nwith no header";
        let (fm, body) = parse_front_matter(raw);
        assert!(fm.doc_type.is_none());
        assert_eq!(body, raw);
    }

    #[test]
    fn malformed_front_matter_delimiter_falls_back_to_whole_file() {
        let raw = "---\ntype: decision\nno closing delimiter here";
        let (fm, body) = parse_front_matter(raw);
        assert!(fm.doc_type.is_none());
        assert_eq!(body, raw);
    }
}
