#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key '{key}' not found in bucket: {bucket}")]
    NotFound { bucket: String, key: String },

    #[error("invalid key: '{0}'")]
    InvalidKey(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sequence error: {0}")]
    Sequence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
