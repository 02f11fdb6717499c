use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("database error: {0}")]
    Database(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("chunking failed: {0}")]
    Chunking(String),

    #[error("embedder request failed: {0}")]
    Embedder(String),

    #[error("vector store request failed: {0}")]
    VectorStore(String),

    #[error("tokenizer sidecar request failed: {0}")]
    Tokenizer(String),

    #[error("sanitised query was empty")]
    EmptyQuery,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for KnowledgeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<deadpool_sqlite::PoolError> for KnowledgeError {
    fn from(e: deadpool_sqlite::PoolError) -> Self {
        Self::Database(format!("pool error: {e}"))
    }
}

impl From<deadpool_sqlite::InteractError> for KnowledgeError {
    fn from(e: deadpool_sqlite::InteractError) -> Self {
        Self::Database(format!("interact error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, KnowledgeError>;
