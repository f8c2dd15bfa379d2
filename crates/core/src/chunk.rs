//! Chunk records and content hashes.

use crate::upload::UploadId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum length of a caller-supplied chunk hash.
pub const MAX_CHUNK_HASH_LEN: usize = 128;

/// Identifier of a chunk record, unique within its session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(Uuid);

impl ChunkId {
    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-computed content hash of a chunk.
///
/// The value is opaque to the coordinator but doubles as the object-store key,
/// so it is restricted to `[A-Za-z0-9._-]` and may not be `.` or `..`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkHash(String);

impl ChunkHash {
    /// Validate and wrap a caller-supplied hash.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(crate::Error::InvalidChunkHash("empty".to_string()));
        }
        if s.len() > MAX_CHUNK_HASH_LEN {
            return Err(crate::Error::InvalidChunkHash(format!(
                "length {} exceeds {MAX_CHUNK_HASH_LEN}",
                s.len()
            )));
        }
        if s == "." || s == ".." {
            return Err(crate::Error::InvalidChunkHash(format!("reserved name: {s}")));
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(crate::Error::InvalidChunkHash(format!(
                "unsupported character {bad:?} in {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Borrow the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChunkHash {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChunkHash {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<ChunkHash> for String {
    fn from(hash: ChunkHash) -> Self {
        hash.0
    }
}

impl AsRef<str> for ChunkHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.0.len() > 16 { &self.0[..16] } else { &self.0 };
        write!(f, "ChunkHash({shown})")
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chunk record status. Moves `Initialized -> Completed` exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkStatus {
    #[serde(rename = "init")]
    Initialized,
    #[serde(rename = "completed")]
    Completed,
}

impl ChunkStatus {
    /// Stored and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "init",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for ChunkStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "init" => Ok(Self::Initialized),
            "completed" => Ok(Self::Completed),
            other => Err(crate::Error::InvalidStatus(format!(
                "unknown chunk status: {other}"
            ))),
        }
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One manifest entry of an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    pub upload_id: UploadId,
    /// 0-based position in the file.
    pub chunk_index: u32,
    pub chunk_hash: ChunkHash,
    /// Most recently issued delegated write URL.
    pub signed_url: Option<String>,
    /// Object-store key the signed URL writes to.
    pub object_key: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub signed_url_expires_at: Option<OffsetDateTime>,
    pub status: ChunkStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_hash_accepts_hex_and_short_names() {
        let hex = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        assert_eq!(ChunkHash::parse(hex).unwrap().as_str(), hex);
        assert_eq!(ChunkHash::parse("h1").unwrap().as_str(), "h1");
        assert_eq!(ChunkHash::parse("  h2 ").unwrap().as_str(), "h2");
    }

    #[test]
    fn test_chunk_hash_rejects_unsafe_keys() {
        for bad in ["", ".", "..", "a/b", "a\\b", "../etc", "a b", "h\u{0}"] {
            assert!(ChunkHash::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        let long = "a".repeat(MAX_CHUNK_HASH_LEN + 1);
        assert!(ChunkHash::parse(&long).is_err());
    }

    #[test]
    fn test_chunk_hash_deserialize_validates() {
        let ok: ChunkHash = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(ok.as_str(), "abc123");
        assert!(serde_json::from_str::<ChunkHash>("\"a/b\"").is_err());
    }

    #[test]
    fn test_chunk_status_roundtrip() {
        for status in [ChunkStatus::Initialized, ChunkStatus::Completed] {
            assert_eq!(status.as_str().parse::<ChunkStatus>().unwrap(), status);
        }
        assert!("done".parse::<ChunkStatus>().is_err());
    }
}
