//! Storage backends for stitch.
//!
//! This crate provides:
//! - Target files receiving positioned (offset) writes, serialized per file
//! - Presigned PUT URLs so chunk bytes go straight to an object store
//! - A keyed async lock table shared by both

pub mod backends;
pub mod error;
pub mod locks;
pub mod traits;

pub use backends::{
    filesystem::FilesystemTargetStore,
    s3::{S3SignerSettings, S3UrlSigner},
};
pub use error::{StorageError, StorageResult};
pub use locks::{KeyedLockGuard, KeyedLocks};
pub use traits::{ByteStream, PresignedUrl, TargetStore, UrlSigner, WriteLimits};

use stitch_core::config::{ObjectStoreConfig, TargetConfig};
use std::sync::Arc;

/// Create the offset-write target store from configuration.
pub async fn target_from_config(config: &TargetConfig) -> StorageResult<Arc<dyn TargetStore>> {
    match config {
        TargetConfig::Filesystem { path } => {
            let store = FilesystemTargetStore::new(path).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Create the delegated-write URL signer from configuration.
pub async fn signer_from_config(config: &ObjectStoreConfig) -> StorageResult<Arc<dyn UrlSigner>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        ObjectStoreConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let static_keys = access_key_id.clone().zip(secret_access_key.clone());
            let signer = S3UrlSigner::new(S3SignerSettings {
                bucket: bucket.clone(),
                endpoint: endpoint.clone(),
                region: region.clone(),
                prefix: prefix.clone(),
                static_keys,
                force_path_style: *force_path_style,
            })
            .await?;
            Ok(Arc::new(signer))
        }
    }
}
