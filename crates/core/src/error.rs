//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
///
/// Every variant describes a caller-supplied value that failed validation, so
/// callers surface these as bad requests before touching any store.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid upload ID: {0}")]
    InvalidUploadId(String),

    #[error("invalid chunk hash: {0}")]
    InvalidChunkHash(String),

    #[error("invalid target name: {0}")]
    InvalidTargetName(String),

    #[error("invalid offset: {0}")]
    InvalidOffset(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
