//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::{NewUpload, RegisteredUpload, UploadSessionRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for upload session operations.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Register a session and all of its chunk records in one transaction.
    ///
    /// The version is `1 + max(version)` over earlier sessions with the same
    /// namespace, relative path and file name. With no chunk hashes the session
    /// is stored already completed. On error nothing is persisted.
    async fn register_upload(&self, upload: &NewUpload) -> MetadataResult<RegisteredUpload>;

    /// Get an upload session by ID.
    async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// Highest version registered for a logical path, if any.
    async fn latest_version(
        &self,
        namespace: &str,
        relative_path: &str,
        file_name: &str,
    ) -> MetadataResult<Option<i64>>;
}
