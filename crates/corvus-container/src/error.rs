use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] corvus_protocol::ProtocolError),

    #[error("container spawn failed: {0}")]
    SpawnFailed(String),

    #[error("container {0} timed out waiting to become ready")]
    ReadyTimeout(String),

    #[error("container {0} is stuck (no heartbeat)")]
    Stuck(String),

    #[error("warm pool exhausted: {0} ready, {1} max")]
    PoolExhausted(usize, usize),

    #[error("no container available for group {0}")]
    NoContainer(String),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
