use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, de::DeserializeOwned};
use stitch_core::UploadId;
use stitch_core::upload::{SignedUrlResponse, StartUploadResponse, UploadStatusResponse};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

/// Fields of a `POST /start-upload` form.
#[derive(Clone, Debug, Default)]
pub struct StartUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub chunk_hashes: Vec<String>,
    pub namespace: Option<String>,
    pub relative_path: Option<String>,
}

impl StartUploadRequest {
    fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("fileName", self.file_name.clone()),
            ("fileSize", self.file_size.to_string()),
        ];
        form.extend(
            self.chunk_hashes
                .iter()
                .map(|hash| ("chunkHashes[]", hash.clone())),
        );
        if let Some(namespace) = &self.namespace {
            form.push(("namespace", namespace.clone()));
        }
        if let Some(relative_path) = &self.relative_path {
            form.push(("relativePath", relative_path.clone()));
        }
        form
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    async fn send_text(&self, req: reqwest::RequestBuilder) -> Result<String> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let body = self.send_text(req).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/health")?;
        self.send_json(self.http.get(url)).await
    }

    /// Write `data` into `file_name` at byte offset `start`.
    pub async fn upload_at_offset(
        &self,
        file_name: &str,
        start: u64,
        data: Vec<u8>,
    ) -> Result<String> {
        let mut url = self.url("/upload")?;
        url.query_pairs_mut()
            .append_pair("fileName", file_name)
            .append_pair("start", &start.to_string());
        self.send_text(self.http.post(url).body(data)).await
    }

    pub async fn start_upload(&self, req: &StartUploadRequest) -> Result<StartUploadResponse> {
        let url = self.url("/start-upload")?;
        self.send_json(self.http.post(url).form(&req.form())).await
    }

    pub async fn get_signed_url(&self, upload_id: &UploadId, chunk_hash: &str) -> Result<String> {
        let mut url = self.url("/get-signed-url")?;
        url.query_pairs_mut()
            .append_pair("uploadID", &upload_id.to_string())
            .append_pair("chunkHash", chunk_hash);
        let response: SignedUrlResponse = self.send_json(self.http.get(url)).await?;
        Ok(response.signed_url)
    }

    pub async fn confirm_chunk(&self, upload_id: &UploadId, chunk_hash: &str) -> Result<String> {
        let url = self.url("/confirm-chunk")?;
        let form = [
            ("uploadID", upload_id.to_string()),
            ("chunkHash", chunk_hash.to_string()),
        ];
        self.send_text(self.http.post(url).form(&form)).await
    }

    pub async fn get_upload(&self, upload_id: &UploadId) -> Result<UploadStatusResponse> {
        let url = self.url(&format!("/uploads/{upload_id}"))?;
        self.send_json(self.http.get(url)).await
    }

    /// PUT chunk bytes straight to a delegated write URL.
    pub async fn put_signed(&self, signed_url: &str, data: Vec<u8>) -> Result<()> {
        let url = Url::parse(signed_url).context("invalid signed URL")?;
        let response = self.http.put(url).body(data).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("object store rejected chunk ({}): {}", status, body);
        }
        Ok(())
    }
}
