//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use stitch_core::config::{AppConfig, ObjectStoreConfig};
use stitch_metadata::MetadataStore;
use stitch_server::{AppState, create_router};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Bucket used by the offline signer configuration.
#[allow(dead_code)]
pub const TEST_BUCKET: &str = "stitch-test";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with a filesystem target, SQLite metadata and no
    /// object store.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server whose signer presigns against a local endpoint
    /// with static credentials. Presigning never contacts the endpoint.
    pub async fn with_signer() -> Self {
        Self::with_config(|config| {
            config.object_store = Some(offline_object_store());
        })
        .await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);
        config.validate().expect("invalid test configuration");

        stitch_server::metrics::register_metrics();

        let targets = stitch_storage::target_from_config(&config.target)
            .await
            .expect("Failed to create target store");
        let metadata = stitch_metadata::from_config(&config.metadata)
            .await
            .expect("Failed to create metadata store");
        let signer = match &config.object_store {
            Some(object_store) => Some(
                stitch_storage::signer_from_config(object_store)
                    .await
                    .expect("Failed to create signer"),
            ),
            None => None,
        };

        let state = AppState::new(config, metadata, targets, signer);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Directory holding offset-write targets.
    pub fn target_root(&self) -> PathBuf {
        self._temp_dir.path().join("files")
    }

    /// Send a request and return the status and raw body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    /// Send a request and decode the body as JSON (`Null` when empty or not JSON).
    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// POST an urlencoded form.
    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> (StatusCode, Vec<u8>) {
        self.send(form_request(uri, fields)).await
    }

    /// POST /start-upload and decode the response.
    pub async fn start_upload(
        &self,
        file_name: &str,
        file_size: u64,
        hashes: &[&str],
    ) -> (StatusCode, Value) {
        let size = file_size.to_string();
        let mut fields = vec![("fileName", file_name), ("fileSize", size.as_str())];
        fields.extend(hashes.iter().map(|h| ("chunkHashes[]", *h)));
        self.send_json(form_request("/start-upload", &fields)).await
    }

    /// POST /confirm-chunk.
    pub async fn confirm(&self, upload_id: &str, chunk_hash: &str) -> (StatusCode, Vec<u8>) {
        self.post_form(
            "/confirm-chunk",
            &[("uploadID", upload_id), ("chunkHash", chunk_hash)],
        )
        .await
    }

    /// GET /get-signed-url.
    pub async fn signed_url(&self, upload_id: &str, chunk_hash: &str) -> (StatusCode, Value) {
        let uri = format!(
            "/get-signed-url?{}",
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair("uploadID", upload_id)
                .append_pair("chunkHash", chunk_hash)
                .finish()
        );
        self.send_json(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    /// POST /upload with raw bytes at an offset.
    pub async fn write_at(
        &self,
        file_name: &str,
        start: &str,
        bytes: &[u8],
    ) -> (StatusCode, Vec<u8>) {
        let uri = format!(
            "/upload?{}",
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair("fileName", file_name)
                .append_pair("start", start)
                .finish()
        );
        let request = Request::post(uri)
            .header("Content-Type", "application/octet-stream")
            .body(Body::from(bytes.to_vec()))
            .unwrap();
        self.send(request).await
    }
}

/// Object store configuration that needs no running service.
#[allow(dead_code)]
pub fn offline_object_store() -> ObjectStoreConfig {
    ObjectStoreConfig::S3 {
        bucket: TEST_BUCKET.to_string(),
        endpoint: Some("http://localhost:9000".to_string()),
        region: Some("us-east-1".to_string()),
        prefix: None,
        access_key_id: Some("test-access-key".to_string()),
        secret_access_key: Some("test-secret-key".to_string()),
        force_path_style: true,
    }
}

/// Build an urlencoded form POST.
#[allow(dead_code)]
pub fn form_request(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter().copied())
        .finish();
    Request::post(uri)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

/// Build a multipart/form-data POST.
#[allow(dead_code)]
pub fn multipart_request(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    const BOUNDARY: &str = "stitch-test-boundary";
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Request::post(uri)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}
