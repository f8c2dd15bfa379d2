//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum body size of a single offset write, in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Largest target file an offset write may reach, in bytes.
    /// Writes starting or ending past this point are rejected.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Maximum number of chunk hashes accepted in one registration.
    #[serde(default = "default_max_chunks_per_upload")]
    pub max_chunks_per_upload: usize,
    /// Maximum size of a form body on the registration and confirmation endpoints.
    #[serde(default = "default_max_form_size")]
    pub max_form_size: usize,
    /// Validity of delegated write URLs in seconds (default: 900).
    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Buffered completion notifications per subscriber before the oldest are dropped.
    #[serde(default = "default_completion_channel_capacity")]
    pub completion_channel_capacity: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    crate::MAX_FILE_SIZE
}

fn default_max_chunks_per_upload() -> usize {
    crate::MAX_CHUNKS_PER_UPLOAD
}

fn default_max_form_size() -> usize {
    4 * 1024 * 1024
}

fn default_signed_url_ttl_secs() -> u64 {
    crate::DEFAULT_SIGNED_URL_TTL_SECS
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_completion_channel_capacity() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_size: default_max_chunk_size(),
            max_file_size: default_max_file_size(),
            max_chunks_per_upload: default_max_chunks_per_upload(),
            max_form_size: default_max_form_size(),
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
            metrics_enabled: default_metrics_enabled(),
            completion_channel_capacity: default_completion_channel_capacity(),
        }
    }
}

impl ServerConfig {
    /// Get the signed URL validity as a Duration.
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.signed_url_ttl_secs == 0 {
            return Err("server.signed_url_ttl_secs must be greater than 0".to_string());
        }
        // S3 rejects presigned requests valid for longer than 7 days.
        if self.signed_url_ttl_secs > 7 * 24 * 60 * 60 {
            return Err(format!(
                "server.signed_url_ttl_secs {} exceeds the 7 day maximum",
                self.signed_url_ttl_secs
            ));
        }
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size must be greater than 0".to_string());
        }
        if self.max_file_size < self.max_chunk_size {
            return Err(format!(
                "server.max_file_size {} is smaller than server.max_chunk_size {}",
                self.max_file_size, self.max_chunk_size
            ));
        }
        if self.max_file_size > i64::MAX as u64 {
            return Err(format!(
                "server.max_file_size {} exceeds maximum value {}",
                self.max_file_size,
                i64::MAX
            ));
        }
        if self.completion_channel_capacity == 0 {
            return Err("server.completion_channel_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Where offset writes land.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetConfig {
    /// Local filesystem directory holding target files.
    Filesystem {
        /// Root directory for target files.
        path: PathBuf,
    },
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/files"),
        }
    }
}

/// Object store that receives delegated chunk writes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectStoreConfig {
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix prepended to every chunk hash.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient AWS credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient AWS credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl ObjectStoreConfig {
    /// Validate object store configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ObjectStoreConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single-node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host (e.g., "localhost" or "db.example.com").
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer STITCH_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields"
                        .to_string(),
                ),
            },
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Offset-write target configuration.
    #[serde(default)]
    pub target: TargetConfig,
    /// Object store for delegated chunk writes. Without it, signed URL
    /// issuance is unavailable.
    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Create a test configuration rooted in `dir`.
    ///
    /// **For testing only.** Uses filesystem targets, SQLite metadata and no object store.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            server: ServerConfig::default(),
            target: TargetConfig::Filesystem {
                path: dir.join("files"),
            },
            object_store: None,
            metadata: MetadataConfig::Sqlite {
                path: dir.join("metadata.db"),
                query_timeout_secs: None,
            },
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        if let Some(object_store) = &self.object_store {
            object_store.validate()?;
        }
        self.metadata.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.signed_url_ttl(), Duration::from_secs(900));
        assert!(config.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_config_deserialize_partial() {
        let json = r#"{"bind": "0.0.0.0:9000"}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.signed_url_ttl_secs, 900);
        assert_eq!(config.max_chunk_size, crate::MAX_CHUNK_SIZE);
    }

    #[test]
    fn test_server_config_rejects_zero_ttl_and_inverted_sizes() {
        let config = ServerConfig {
            signed_url_ttl_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            max_chunk_size: 10,
            max_file_size: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            signed_url_ttl_secs: 8 * 24 * 60 * 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_object_store_s3_validate_partial_credentials() {
        let invalid = ObjectStoreConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(invalid.validate().is_err());

        let valid = ObjectStoreConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: Some("secret-key".to_string()),
            force_path_style: false,
        };
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_object_store_s3_force_path_style_defaults_to_false() {
        let json = r#"{"type":"s3","bucket":"uploads","endpoint":"http://localhost:9000"}"#;
        let config: ObjectStoreConfig = serde_json::from_str(json).unwrap();
        match config {
            ObjectStoreConfig::S3 {
                force_path_style,
                bucket,
                ..
            } => {
                assert!(!force_path_style);
                assert_eq!(bucket, "uploads");
            }
        }
    }

    #[test]
    fn test_metadata_config_postgres_validation() {
        let missing_db = MetadataConfig::Postgres {
            url: None,
            host: Some("localhost".to_string()),
            port: Some(5432),
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 5,
            statement_timeout_ms: None,
        };
        assert!(missing_db.validate().is_err());

        let with_url = MetadataConfig::Postgres {
            url: Some("postgres://localhost/stitch".to_string()),
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 5,
            statement_timeout_ms: None,
        };
        assert!(with_url.validate().is_ok());
    }

    #[test]
    fn test_app_config_defaults_have_no_object_store() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(config.object_store.is_none());
        assert!(matches!(config.target, TargetConfig::Filesystem { .. }));
        assert!(config.validate().is_ok());
    }
}
