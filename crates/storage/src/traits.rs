//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use stitch_core::TargetName;
use time::OffsetDateTime;

/// A boxed stream of bytes, used for request bodies written to a target.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Size bounds enforced while a write streams in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteLimits {
    /// Largest number of bytes a single write may carry.
    pub max_write_size: u64,
    /// Largest file size a write may produce (`offset + bytes`).
    pub max_file_size: u64,
}

impl WriteLimits {
    pub fn new(max_write_size: u64, max_file_size: u64) -> Self {
        Self {
            max_write_size,
            max_file_size,
        }
    }
}

/// Files that receive positioned writes.
///
/// Writes to the same target are serialized; writes to different targets
/// proceed in parallel. Bytes outside `[offset, offset + len)` are left as they
/// were, so callers may fill a file in any order.
#[async_trait]
pub trait TargetStore: Send + Sync + 'static {
    /// Write `body` at `offset` in the named target, creating it if needed.
    ///
    /// Returns the number of bytes written.
    async fn write_at(
        &self,
        name: &TargetName,
        offset: u64,
        body: ByteStream,
        limits: WriteLimits,
    ) -> StorageResult<u64>;

    /// Read a whole target.
    async fn read(&self, name: &TargetName) -> StorageResult<Bytes>;

    /// Current size of a target in bytes.
    async fn len(&self, name: &TargetName) -> StorageResult<u64>;

    /// Get the name of this backend (for metrics and logging).
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and usable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// A time-limited URL granting one PUT of an object.
#[derive(Clone, Debug)]
pub struct PresignedUrl {
    pub url: String,
    /// Full object key the URL writes to (prefix applied).
    pub object_key: String,
    pub expires_at: OffsetDateTime,
}

/// Issues delegated write URLs so clients upload chunk bytes directly to an
/// object store.
#[async_trait]
pub trait UrlSigner: Send + Sync + 'static {
    /// Presign a PUT of `key`, valid for `expires_in`.
    async fn presign_put(&self, key: &str, expires_in: Duration) -> StorageResult<PresignedUrl>;

    /// Get the name of this backend (for metrics and logging).
    fn backend_name(&self) -> &'static str;

    /// Verify the object store is reachable with the configured credentials.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
