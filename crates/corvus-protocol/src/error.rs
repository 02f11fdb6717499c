use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IPC frame failed integrity check")]
    IntegrityRejected,

    #[error("HMAC error: {0}")]
    Hmac(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
