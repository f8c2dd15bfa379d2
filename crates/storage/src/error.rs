//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("write too large: {0}")]
    LimitExceeded(String),

    #[error("request body error: {0}")]
    Body(String),

    #[error("presign error: {0}")]
    Presign(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether the caller supplied something unacceptable, as opposed to the
    /// backend failing.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidKey(_) | StorageError::LimitExceeded(_) | StorageError::Body(_)
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
