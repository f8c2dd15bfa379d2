//! Core domain types and shared logic for stitch.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload session identifiers, lifecycle status and wire shapes
//! - Chunk records and caller-supplied content hashes
//! - Target file names for offset writes
//! - Configuration

pub mod chunk;
pub mod config;
pub mod error;
pub mod target;
pub mod upload;

pub use chunk::{ChunkHash, ChunkId, ChunkRecord, ChunkStatus};
pub use error::{Error, Result};
pub use target::{ByteOffset, TargetName};
pub use upload::{UploadCompleted, UploadId, UploadSession, UploadStatus};

/// Default validity of a delegated write URL: 15 minutes.
pub const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 15 * 60;

/// Maximum size of a single offset-write body: 32 MiB.
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Largest target file an offset write may address: 64 GiB.
pub const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024 * 1024;

/// Maximum number of chunks in one upload manifest.
pub const MAX_CHUNKS_PER_UPLOAD: usize = 10_000;
