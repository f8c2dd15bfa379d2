//! Upload chunk repository.

use crate::error::MetadataResult;
use crate::models::{ConfirmOutcome, UploadChunkRow};
use async_trait::async_trait;
use stitch_core::ChunkStatus;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for chunk records of upload sessions.
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// All chunk records of a session, ordered by index.
    async fn get_chunks(&self, upload_id: Uuid) -> MetadataResult<Vec<UploadChunkRow>>;

    /// First chunk record (lowest index) carrying `chunk_hash` in a session.
    async fn get_chunk(
        &self,
        upload_id: Uuid,
        chunk_hash: &str,
    ) -> MetadataResult<Option<UploadChunkRow>>;

    /// Store the issued URL on every record matching `(upload_id, chunk_hash)`.
    ///
    /// Returns the number of records updated. Fails with `NotFound` when no
    /// record matches; nothing is written in that case.
    async fn record_signed_url(
        &self,
        upload_id: Uuid,
        chunk_hash: &str,
        signed_url: &str,
        object_key: &str,
        expires_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Mark matching records completed and, when every record of the session
    /// is completed, transition the session.
    ///
    /// The chunk update, the count and the session transition run in a
    /// single transaction, so concurrent confirmations of the last chunks
    /// observe each other and exactly one reports `transitioned`. Confirming
    /// an already-completed chunk changes nothing. Fails with `NotFound` when
    /// the session or the hash is unknown.
    async fn confirm_chunk(
        &self,
        upload_id: Uuid,
        chunk_hash: &str,
        confirmed_at: OffsetDateTime,
    ) -> MetadataResult<ConfirmOutcome>;

    /// Count chunk records of a session, optionally filtered by status.
    async fn count_chunks(
        &self,
        upload_id: Uuid,
        status: Option<ChunkStatus>,
    ) -> MetadataResult<u64>;
}
