//! Application state shared across handlers.

use crate::completion::CompletionNotifier;
use stitch_core::config::AppConfig;
use stitch_metadata::MetadataStore;
use stitch_storage::{TargetStore, UrlSigner, WriteLimits};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Upload registry.
    pub metadata: Arc<dyn MetadataStore>,
    /// Files receiving offset writes.
    pub targets: Arc<dyn TargetStore>,
    /// Delegated write URL issuer; absent when no object store is configured.
    pub signer: Option<Arc<dyn UrlSigner>>,
    /// Session completion events.
    pub completions: CompletionNotifier,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        targets: Arc<dyn TargetStore>,
        signer: Option<Arc<dyn UrlSigner>>,
    ) -> Self {
        let completions = CompletionNotifier::new(config.server.completion_channel_capacity);
        Self {
            config: Arc::new(config),
            metadata,
            targets,
            signer,
            completions,
        }
    }

    /// Limits applied to every offset write.
    pub fn write_limits(&self) -> WriteLimits {
        WriteLimits::new(
            self.config.server.max_chunk_size,
            self.config.server.max_file_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_metadata::SqliteStore;
    use stitch_storage::FilesystemTargetStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_limits_follow_config() {
        let temp = tempdir().unwrap();
        let mut config = AppConfig::for_testing(temp.path());
        config.server.max_chunk_size = 1024;
        config.server.max_file_size = 4096;

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(temp.path().join("metadata.db"), None).await.unwrap());
        let targets: Arc<dyn TargetStore> =
            Arc::new(FilesystemTargetStore::new(temp.path().join("files")).await.unwrap());

        let state = AppState::new(config, metadata, targets, None);
        assert_eq!(state.write_limits(), WriteLimits::new(1024, 4096));
        assert!(state.signer.is_none());
    }
}
