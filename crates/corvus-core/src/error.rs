use thiserror::Error;

/// The closed error taxonomy shared across every subsystem boundary.
///
/// Variants map 1:1 onto the kinds the orchestrator must classify at the
/// point an error becomes user-visible: some are retryable, some degrade a
/// single channel, some stop startup outright.
#[derive(Debug, Error)]
pub enum CorvusError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("upstream throttled, retry after {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    #[error("queue is full")]
    BusyQueue,

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("container spawn failed: {0}")]
    ContainerSpawnFailed(String),

    #[error("container timed out after {ms}ms")]
    ContainerTimeout { ms: u64 },

    #[error("container {container_id} is stuck (no heartbeat for {secs}s)")]
    ContainerStuck { container_id: String, secs: u64 },

    #[error("stream ended without a completion frame")]
    PartialOutput,

    #[error("knowledge engine unavailable: {0}")]
    KnowledgeUnavailable(String),

    #[error("IPC frame rejected: {0}")]
    IntegrityRejected(String),

    #[error("scheduled task {id} circuit-broken after {failures} consecutive failures")]
    ScheduleBrokenTask { id: String, failures: u32 },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CorvusError {
    /// Short, stable error code, e.g. for HTTP API `{error: ...}` bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::TransientIo(_) => "TRANSIENT_IO",
            Self::Throttled { .. } => "THROTTLED",
            Self::BusyQueue => "BUSY_QUEUE",
            Self::BadInput(_) => "BAD_INPUT",
            Self::AuthFailure(_) => "AUTH_FAILURE",
            Self::ContainerSpawnFailed(_) => "CONTAINER_SPAWN_FAILED",
            Self::ContainerTimeout { .. } => "CONTAINER_TIMEOUT",
            Self::ContainerStuck { .. } => "CONTAINER_STUCK",
            Self::PartialOutput => "PARTIAL_OUTPUT",
            Self::KnowledgeUnavailable(_) => "KNOWLEDGE_UNAVAILABLE",
            Self::IntegrityRejected(_) => "INTEGRITY_REJECTED",
            Self::ScheduleBrokenTask { .. } => "SCHEDULE_BROKEN_TASK",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the orchestrator should retry this operation automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientIo(_) | Self::Throttled { .. } | Self::PartialOutput
        )
    }

    /// Short, human-readable message safe to surface to an end user.
    pub fn to_user_string(&self) -> String {
        match self {
            Self::BusyQueue => "The system is busy right now, please try again shortly.".into(),
            Self::AuthFailure(_) => {
                "This channel needs to be reconnected; an admin has been notified.".into()
            }
            Self::ContainerTimeout { .. } | Self::ContainerStuck { .. } => {
                "That took too long and was cancelled. Please try again.".into()
            }
            Self::KnowledgeUnavailable(_) => {
                "I couldn't reach the knowledge engine, so this answer may be incomplete.".into()
            }
            Self::BadInput(msg) => format!("I couldn't understand that: {msg}"),
            _ => "Something went wrong. Please try again.".into(),
        }
    }
}

impl From<String> for CorvusError {
    fn from(s: String) -> Self {
        Self::Internal(s)
    }
}

impl From<tokio::task::JoinError> for CorvusError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("task join error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, CorvusError>;
