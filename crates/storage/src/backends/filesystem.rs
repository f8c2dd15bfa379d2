//! Local filesystem target store for offset writes.

use crate::error::{StorageError, StorageResult};
use crate::locks::KeyedLocks;
use crate::traits::{ByteStream, TargetStore, WriteLimits};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use stitch_core::TargetName;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

/// Target files stored under a root directory.
///
/// Each target has its own lock, so concurrent writes to one file are
/// serialized while different files are written in parallel.
pub struct FilesystemTargetStore {
    root: PathBuf,
    locks: KeyedLocks,
}

impl FilesystemTargetStore {
    /// Create a new filesystem target store.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: KeyedLocks::new(),
        })
    }

    /// Per-target lock table.
    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Resolve a target name under the root off the async runtime.
    ///
    /// `canonicalize` and `symlink_metadata` block, so they run in `spawn_blocking`.
    async fn target_path(&self, name: &TargetName) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let name = name.as_str().to_string();
        tokio::task::spawn_blocking(move || Self::target_path_sync(&root, &name))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Resolve a target name under the root, refusing anything that escapes it.
    ///
    /// `TargetName` already rejects `..` and absolute paths; this additionally
    /// follows symlinks already on disk.
    fn target_path_sync(root: &Path, name: &str) -> StorageResult<PathBuf> {
        for component in Path::new(name).components() {
            if !matches!(component, std::path::Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {name}"
                )));
            }
        }

        let path = root.join(name);

        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // An existing path (or a dangling symlink) must resolve inside the root.
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!(
                            "symlink target missing or invalid: {name}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;

                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {name}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // A new path: its nearest existing ancestor must resolve inside the root,
        // otherwise create_dir_all would follow a symlinked directory out of it.
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {name}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;

                    if !parent_canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "ancestor path escapes storage root: {name}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn not_found_or_io(name: &TargetName, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl TargetStore for FilesystemTargetStore {
    #[instrument(skip(self, body, limits), fields(backend = "filesystem", target_file = %name))]
    async fn write_at(
        &self,
        name: &TargetName,
        offset: u64,
        mut body: ByteStream,
        limits: WriteLimits,
    ) -> StorageResult<u64> {
        if offset > limits.max_file_size {
            return Err(StorageError::LimitExceeded(format!(
                "offset {offset} is beyond the maximum file size {}",
                limits.max_file_size
            )));
        }

        let path = self.target_path(name).await?;
        let _guard = self.locks.lock(name.as_str()).await;

        self.ensure_parent(&path).await?;
        // Never truncate: other ranges of the file belong to other writes.
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut written: u64 = 0;
        while let Some(frame) = body.next().await {
            let frame = frame?;
            let next = written + frame.len() as u64;
            if next > limits.max_write_size {
                return Err(StorageError::LimitExceeded(format!(
                    "write exceeds the maximum of {} bytes",
                    limits.max_write_size
                )));
            }
            if offset.saturating_add(next) > limits.max_file_size {
                return Err(StorageError::LimitExceeded(format!(
                    "write would grow the file past {} bytes",
                    limits.max_file_size
                )));
            }
            file.write_all(&frame).await?;
            written = next;
        }

        file.flush().await?;
        file.sync_data().await?;

        tracing::debug!(offset, bytes = written, "Offset write applied");
        Ok(written)
    }

    #[instrument(skip(self), fields(backend = "filesystem", target_file = %name))]
    async fn read(&self, name: &TargetName) -> StorageResult<Bytes> {
        let path = self.target_path(name).await?;
        let data = fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(name, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem", target_file = %name))]
    async fn len(&self, name: &TargetName) -> StorageResult<u64> {
        let path = self.target_path(name).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(name, e))?;
        Ok(metadata.len())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("target root not accessible: {}", e),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("target root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&'static [u8]]) -> ByteStream {
        let frames: Vec<StorageResult<Bytes>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        Box::pin(futures::stream::iter(frames))
    }

    fn limits() -> WriteLimits {
        WriteLimits::new(1024, 4096)
    }

    fn name(s: &str) -> TargetName {
        TargetName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_out_of_order_writes_assemble() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemTargetStore::new(dir.path()).await.unwrap();
        let target = name("hello.txt");

        store
            .write_at(&target, 5, body(&[b"WORLD"]), limits())
            .await
            .unwrap();
        store
            .write_at(&target, 0, body(&[b"HEL", b"LO"]), limits())
            .await
            .unwrap();

        assert_eq!(store.read(&target).await.unwrap(), Bytes::from("HELLOWORLD"));
        assert_eq!(store.len(&target).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_write_preserves_bytes_outside_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemTargetStore::new(dir.path()).await.unwrap();
        let target = name("data.bin");

        store
            .write_at(&target, 0, body(&[b"aaaaaaaa"]), limits())
            .await
            .unwrap();
        store
            .write_at(&target, 2, body(&[b"bb"]), limits())
            .await
            .unwrap();

        assert_eq!(store.read(&target).await.unwrap(), Bytes::from("aabbaaaa"));
    }

    #[tokio::test]
    async fn test_gap_is_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemTargetStore::new(dir.path()).await.unwrap();
        let target = name("sparse.bin");

        store
            .write_at(&target, 4, body(&[b"xy"]), limits())
            .await
            .unwrap();

        assert_eq!(
            store.read(&target).await.unwrap(),
            Bytes::from_static(b"\0\0\0\0xy")
        );
    }

    #[tokio::test]
    async fn test_nested_target_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemTargetStore::new(dir.path()).await.unwrap();
        let target = name("uploads/2024/report.pdf");

        let written = store
            .write_at(&target, 0, body(&[b"pdf"]), limits())
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert!(dir.path().join("uploads/2024/report.pdf").exists());
    }

    #[tokio::test]
    async fn test_write_limit_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemTargetStore::new(dir.path()).await.unwrap();
        let target = name("big.bin");

        let err = store
            .write_at(&target, 0, body(&[b"12345678"]), WriteLimits::new(4, 4096))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LimitExceeded(_)));

        let err = store
            .write_at(&target, 4090, body(&[b"12345678"]), limits())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LimitExceeded(_)));

        let err = store
            .write_at(&target, 5000, body(&[b"1"]), limits())
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_body_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemTargetStore::new(dir.path()).await.unwrap();
        let frames: Vec<StorageResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"ok")),
            Err(StorageError::Body("connection reset".to_string())),
        ];

        let err = store
            .write_at(&name("cut.bin"), 0, Box::pin(futures::stream::iter(frames)), limits())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Body(_)));
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_one_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FilesystemTargetStore::new(dir.path()).await.unwrap());
        let target = name("parallel.bin");

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let store = store.clone();
            let target = target.clone();
            handles.push(tokio::spawn(async move {
                let frame = Bytes::from(vec![b'a' + i; 8]);
                let stream: ByteStream = Box::pin(futures::stream::iter(vec![Ok(frame)]));
                store
                    .write_at(&target, u64::from(i) * 8, stream, WriteLimits::new(8, 4096))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let data = store.read(&target).await.unwrap();
        assert_eq!(data.len(), 128);
        for i in 0..16usize {
            assert!(data[i * 8..(i + 1) * 8].iter().all(|b| *b == b'a' + i as u8));
        }
        assert_eq!(store.locks().active_keys(), 0);
    }

    #[tokio::test]
    async fn test_read_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemTargetStore::new(dir.path()).await.unwrap();
        let err = store.read(&name("absent.txt")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();

        let outside_file = outside_dir.path().join("secret.txt");
        std::fs::write(&outside_file, "secret data").unwrap();

        let store = FilesystemTargetStore::new(dir.path()).await.unwrap();

        symlink(&outside_file, dir.path().join("malicious_link")).unwrap();
        let result = store
            .write_at(&name("malicious_link"), 0, body(&[b"x"]), limits())
            .await;
        match result {
            Err(StorageError::InvalidKey(msg)) => {
                assert!(msg.contains("escapes storage root"), "unexpected message: {msg}")
            }
            other => panic!("expected InvalidKey error, got: {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(&outside_file).unwrap(), "secret data");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_ancestor_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();

        let store = FilesystemTargetStore::new(dir.path()).await.unwrap();
        symlink(outside_dir.path(), dir.path().join("escape")).unwrap();

        let result = store
            .write_at(&name("escape/nested/deep/file.txt"), 0, body(&[b"data"]), limits())
            .await;
        match result {
            Err(StorageError::InvalidKey(msg)) => {
                assert!(msg.contains("escapes storage root"), "unexpected message: {msg}")
            }
            other => panic!("expected InvalidKey error, got: {other:?}"),
        }
        assert!(!outside_dir.path().join("nested").exists());
    }
}
