//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use stitch_core::{
    ChunkHash, ChunkId, ChunkRecord, ChunkStatus, UploadId, UploadSession, UploadStatus,
};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Upload sessions
// =============================================================================

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub upload_id: Uuid,
    pub namespace: String,
    pub relative_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub chunks_total: i64,
    /// Per-path revision, starting at 1.
    pub version: i64,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl UploadSessionRow {
    /// Convert into the domain type, rejecting corrupt numeric or status columns.
    pub fn into_domain(self) -> MetadataResult<UploadSession> {
        Ok(UploadSession {
            upload_id: UploadId::from_uuid(self.upload_id),
            namespace: self.namespace,
            relative_path: self.relative_path,
            version: to_u32("version", self.version)?,
            file_name: self.file_name,
            file_size: u64::try_from(self.file_size).map_err(|_| {
                MetadataError::Internal(format!("negative file_size {}", self.file_size))
            })?,
            chunks_total: to_u32("chunks_total", self.chunks_total)?,
            status: self.status.parse::<UploadStatus>()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

// =============================================================================
// Upload chunks
// =============================================================================

/// One manifest entry of an upload session.
#[derive(Debug, Clone, FromRow)]
pub struct UploadChunkRow {
    pub chunk_id: Uuid,
    pub upload_id: Uuid,
    pub chunk_index: i64,
    pub chunk_hash: String,
    pub signed_url: Option<String>,
    pub object_key: Option<String>,
    pub signed_url_expires_at: Option<OffsetDateTime>,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl UploadChunkRow {
    pub fn into_domain(self) -> MetadataResult<ChunkRecord> {
        Ok(ChunkRecord {
            chunk_id: ChunkId::from_uuid(self.chunk_id),
            upload_id: UploadId::from_uuid(self.upload_id),
            chunk_index: to_u32("chunk_index", self.chunk_index)?,
            chunk_hash: ChunkHash::parse(&self.chunk_hash)?,
            signed_url: self.signed_url,
            object_key: self.object_key,
            signed_url_expires_at: self.signed_url_expires_at,
            status: self.status.parse::<ChunkStatus>()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

/// Convert a batch of chunk rows, preserving order.
pub fn chunks_into_domain(rows: Vec<UploadChunkRow>) -> MetadataResult<Vec<ChunkRecord>> {
    rows.into_iter().map(UploadChunkRow::into_domain).collect()
}

fn to_u32(column: &str, value: i64) -> MetadataResult<u32> {
    u32::try_from(value)
        .map_err(|_| MetadataError::Internal(format!("{column} out of range: {value}")))
}

// =============================================================================
// Write models
// =============================================================================

/// Input to an atomic upload registration.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub upload_id: Uuid,
    pub namespace: String,
    pub relative_path: String,
    pub file_name: String,
    pub file_size: i64,
    /// Chunk hashes in manifest order; the position becomes `chunk_index`.
    pub chunk_hashes: Vec<String>,
    pub created_at: OffsetDateTime,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct RegisteredUpload {
    pub session: UploadSessionRow,
    pub chunks: Vec<UploadChunkRow>,
}

/// Outcome of a chunk confirmation.
#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    /// This call moved at least one matching chunk from init to completed.
    pub chunk_newly_completed: bool,
    pub completed_chunks: u64,
    pub total_chunks: u64,
    /// Session status after the confirmation committed.
    pub session_status: UploadStatus,
    /// This call performed the session's transition to completed.
    pub transitioned: bool,
    /// Session row as read inside the confirming transaction.
    pub session: UploadSessionRow,
}
