//! Upload session types and lifecycle.

use crate::chunk::ChunkRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| crate::Error::InvalidUploadId(format!("{s:?}: {e}")))
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session status.
///
/// The only transition is `Initialized -> Completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStatus {
    /// Registered; at least one chunk is not yet confirmed.
    #[serde(rename = "init")]
    Initialized,
    /// Every chunk has been confirmed.
    #[serde(rename = "completed")]
    Completed,
}

impl UploadStatus {
    /// Stored and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "init",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for UploadStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "init" => Ok(Self::Initialized),
            "completed" => Ok(Self::Completed),
            other => Err(crate::Error::InvalidStatus(format!(
                "unknown upload status: {other}"
            ))),
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upload session: one logical file assembled from delegated chunk writes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier.
    pub upload_id: UploadId,
    /// Owner scope of the logical file (empty when unscoped).
    pub namespace: String,
    /// Directory of the logical file within the namespace.
    pub relative_path: String,
    /// Monotonic per logical file path, starting at 1.
    pub version: u32,
    /// Logical file name.
    pub file_name: String,
    /// Caller-declared total size in bytes.
    pub file_size: u64,
    /// Number of chunk records registered with the session.
    pub chunks_total: u32,
    /// Current lifecycle status.
    pub status: UploadStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl UploadSession {
    /// Logical file path used to scope the version counter.
    pub fn logical_path(&self) -> String {
        logical_path(&self.namespace, &self.relative_path, &self.file_name)
    }
}

/// Join the parts of a logical file path.
pub fn logical_path(namespace: &str, relative_path: &str, file_name: &str) -> String {
    let dir = relative_path.trim_matches('/');
    match (namespace.is_empty(), dir.is_empty()) {
        (true, true) => file_name.to_string(),
        (true, false) => format!("{dir}/{file_name}"),
        (false, true) => format!("{namespace}:{file_name}"),
        (false, false) => format!("{namespace}:{dir}/{file_name}"),
    }
}

/// Response from registering an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartUploadResponse {
    /// The new session identifier.
    #[serde(rename = "uploadID")]
    pub upload_id: UploadId,
    /// One record per manifest entry, in manifest order.
    pub chunks: Vec<ChunkRecord>,
}

/// Response carrying a delegated write URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedUrlResponse {
    pub signed_url: String,
}

/// Response from querying an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub upload: UploadSession,
    pub chunks: Vec<ChunkRecord>,
    /// Number of chunk records with status `completed`.
    pub completed_chunks: u64,
    /// Number of chunk records registered with the session.
    pub total_chunks: u64,
}

/// Emitted once per session when it reaches `Completed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCompleted {
    pub upload_id: UploadId,
    pub file_name: String,
    pub version: u32,
    pub chunks_total: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_id_roundtrip() {
        let id = UploadId::new();
        let as_str = id.to_string();
        let parsed = UploadId::parse(&as_str).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.as_uuid(), parsed.as_uuid());
        assert!(UploadId::parse("not-a-uuid").is_err());
        assert!(UploadId::parse("").is_err());
    }

    #[test]
    fn test_upload_status_strings() {
        assert_eq!(UploadStatus::Initialized.as_str(), "init");
        assert_eq!(UploadStatus::Completed.as_str(), "completed");
        assert_eq!(
            "completed".parse::<UploadStatus>().unwrap(),
            UploadStatus::Completed
        );
        assert!("open".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn test_upload_status_serializes_as_wire_value() {
        let json = serde_json::to_string(&UploadStatus::Initialized).unwrap();
        assert_eq!(json, "\"init\"");
    }

    #[test]
    fn test_logical_path_variants() {
        assert_eq!(logical_path("", "", "a.txt"), "a.txt");
        assert_eq!(logical_path("", "/docs/2024/", "a.txt"), "docs/2024/a.txt");
        assert_eq!(logical_path("alice", "", "a.txt"), "alice:a.txt");
        assert_eq!(logical_path("alice", "docs", "a.txt"), "alice:docs/a.txt");
    }

    #[test]
    fn test_start_upload_response_field_names() {
        let response = StartUploadResponse {
            upload_id: UploadId::new(),
            chunks: Vec::new(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("uploadID").is_some());
        assert!(value.get("chunks").unwrap().as_array().unwrap().is_empty());
    }
}
