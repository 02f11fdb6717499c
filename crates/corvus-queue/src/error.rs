use thiserror::Error;

/// Errors that can occur while enqueuing, persisting, or draining queue entries.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_sqlite::PoolError),

    #[error("queue supervisor interaction failed: {0}")]
    Interact(String),

    /// The global queue has reached its bounded capacity; the entry was not persisted.
    #[error("queue is full: capacity {capacity} reached")]
    Full { capacity: usize },

    #[error("invalid entry status: {0}")]
    InvalidStatus(String),

    #[error("queue entry not found: {id}")]
    NotFound { id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<deadpool_sqlite::InteractError> for QueueError {
    fn from(e: deadpool_sqlite::InteractError) -> Self {
        Self::Interact(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
