//! S3-compatible delegated write URLs using AWS SDK presigning.

use crate::error::{StorageError, StorageResult};
use crate::traits::{PresignedUrl, UrlSigner};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_credential_types::Credentials;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

/// Longest validity S3 accepts for a SigV4 presigned request.
const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_REGION: &str = "us-east-1";

/// Characters escaped in object keys when rendered for logs. Path separators
/// and the unreserved set stay readable.
const KEY_LOG_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Connection settings for [`S3UrlSigner`].
#[derive(Clone, Debug, Default)]
pub struct S3SignerSettings {
    pub bucket: String,
    /// Custom endpoint (MinIO and friends). A bare `host:port` is treated as http.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Key prefix prepended to every chunk hash.
    pub prefix: Option<String>,
    /// Static `(access_key_id, secret_access_key)`. When absent the ambient
    /// AWS credential chain is used.
    pub static_keys: Option<(String, String)>,
    /// `endpoint/bucket/key` instead of `bucket.endpoint/key`.
    pub force_path_style: bool,
}

/// Presigns PUT requests against an S3-compatible bucket.
///
/// Chunk bytes never pass through the server: clients PUT them to the
/// returned URL, keyed by chunk hash under the configured prefix.
pub struct S3UrlSigner {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for S3UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3UrlSigner")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn with_scheme(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

fn normalize_prefix(prefix: Option<String>) -> Option<String> {
    prefix
        .map(|p| p.trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
}

impl S3UrlSigner {
    pub async fn new(settings: S3SignerSettings) -> StorageResult<Self> {
        let S3SignerSettings {
            bucket,
            endpoint,
            region,
            prefix,
            static_keys,
            force_path_style,
        } = settings;

        if bucket.trim().is_empty() {
            return Err(StorageError::Config("s3 bucket must not be empty".to_string()));
        }

        let region = aws_config::Region::new(region.unwrap_or_else(|| DEFAULT_REGION.to_string()));
        let credentials = match static_keys {
            Some((key_id, secret)) => SharedCredentialsProvider::new(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "stitch-config",
            )),
            None => SharedCredentialsProvider::new(
                DefaultCredentialsChain::builder()
                    .region(region.clone())
                    .build()
                    .await,
            ),
        };

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(region.clone())
            .credentials_provider(credentials)
            .force_path_style(force_path_style);

        let endpoint = endpoint.as_deref().map(with_scheme);
        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url);
            // Plain HTTP endpoints don't need native trust roots.
            if url.starts_with("http://") {
                builder = builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        let prefix = normalize_prefix(prefix);
        tracing::info!(
            bucket = %bucket,
            endpoint = endpoint.as_deref().unwrap_or("aws"),
            region = %region,
            prefix = ?prefix,
            "S3 URL signer configured"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
            prefix,
        })
    }

    /// Object key a chunk hash is written under.
    fn object_key(&self, hash: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{hash}"),
            None => hash.to_string(),
        }
    }
}

#[async_trait]
impl UrlSigner for S3UrlSigner {
    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn presign_put(&self, key: &str, expires_in: Duration) -> StorageResult<PresignedUrl> {
        if expires_in.is_zero() || expires_in > MAX_PRESIGN_EXPIRY {
            return Err(StorageError::Presign(format!(
                "expiry of {}s is outside 1s..={}s",
                expires_in.as_secs(),
                MAX_PRESIGN_EXPIRY.as_secs()
            )));
        }

        let object_key = self.object_key(key);
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Presign(format!("invalid presigning config: {e}")))?;

        let issued_at = OffsetDateTime::now_utc();
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;

        tracing::debug!(
            object_key = %utf8_percent_encode(&object_key, KEY_LOG_ENCODE_SET),
            expires_in_secs = expires_in.as_secs(),
            "Presigned PUT issued"
        );

        Ok(PresignedUrl {
            url: request.uri().to_string(),
            object_key,
            expires_at: issued_at + expires_in,
        })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let probe = self.client.head_bucket().bucket(&self.bucket).send();
        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(StorageError::S3(Box::new(e))),
            Err(_) => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("bucket {} did not answer within {PROBE_TIMEOUT:?}", self.bucket),
            ))),
        }
    }
}
