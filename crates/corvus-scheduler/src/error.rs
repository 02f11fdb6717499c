use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_sqlite::PoolError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("scheduler interaction failed: {0}")]
    Interact(String),

    /// The provided schedule definition is invalid or unsupported.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given ID exists in the store.
    #[error("job not found: {id}")]
    JobNotFound { id: String },
}

impl From<deadpool_sqlite::InteractError> for SchedulerError {
    fn from(e: deadpool_sqlite::InteractError) -> Self {
        Self::Interact(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
