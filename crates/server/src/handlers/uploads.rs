//! Upload registration and status handlers.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{observe, read_form};
use crate::metrics::{UPLOAD_SESSIONS_COMPLETED, UPLOAD_SESSIONS_REGISTERED};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use stitch_core::upload::{StartUploadResponse, UploadStatusResponse};
use stitch_core::{ChunkHash, ChunkStatus, TargetName, UploadCompleted, UploadId, UploadStatus};
use stitch_metadata::NewUpload;
use stitch_metadata::models::chunks_into_domain;
use time::OffsetDateTime;

/// Maximum length of the optional namespace field.
const MAX_NAMESPACE_LEN: usize = 255;

fn validate_namespace(namespace: &str) -> ApiResult<()> {
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(ApiError::BadRequest(format!(
            "namespace exceeds {MAX_NAMESPACE_LEN} bytes"
        )));
    }
    if namespace
        .chars()
        .any(|c| c == ':' || c == '/' || c.is_control())
    {
        return Err(ApiError::BadRequest(format!(
            "namespace contains an unsupported character: {namespace:?}"
        )));
    }
    Ok(())
}

/// Normalize the optional relative directory of a logical file.
fn normalize_relative_path(relative_path: &str) -> ApiResult<String> {
    let trimmed = relative_path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    TargetName::parse(trimmed)
        .map(String::from)
        .map_err(|e| ApiError::BadRequest(format!("invalid relativePath: {e}")))
}

fn parse_file_size(raw: &str) -> ApiResult<i64> {
    let size: u64 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid fileSize: {raw:?}")))?;
    i64::try_from(size).map_err(|_| {
        ApiError::BadRequest(format!(
            "fileSize {size} exceeds maximum supported size {}",
            i64::MAX
        ))
    })
}

/// POST /start-upload - Register an upload session and its chunk manifest.
///
/// Form fields: `fileName`, `fileSize`, repeated `chunkHashes[]`, and optional
/// `namespace` and `relativePath`. Session and chunk records are written in
/// one transaction. An empty manifest registers an already completed session.
#[tracing::instrument(skip(state, req), fields(upload_id, file_name))]
pub async fn start_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<StartUploadResponse>> {
    observe(register(&state, req).await)
}

async fn register(state: &AppState, req: Request) -> ApiResult<Json<StartUploadResponse>> {
    let form = read_form(state, req).await?;

    let file_name = TargetName::parse(form.require("fileName")?)?;
    let file_size = parse_file_size(form.require("fileSize")?)?;
    let namespace = form.get("namespace").unwrap_or_default().trim().to_string();
    validate_namespace(&namespace)?;
    let relative_path = normalize_relative_path(form.get("relativePath").unwrap_or_default())?;

    // Accept the bare field name too; some form encoders drop the brackets.
    let chunk_hashes = form
        .get_all("chunkHashes[]")
        .chain(form.get_all("chunkHashes"))
        .map(|h| ChunkHash::parse(h).map(String::from))
        .collect::<Result<Vec<_>, _>>()?;

    let max_chunks = state.config.server.max_chunks_per_upload;
    if chunk_hashes.len() > max_chunks {
        return Err(ApiError::BadRequest(format!(
            "{} chunk hashes exceed the maximum of {max_chunks}",
            chunk_hashes.len()
        )));
    }

    let upload_id = UploadId::new();
    let span = tracing::Span::current();
    span.record("upload_id", tracing::field::display(upload_id));
    span.record("file_name", file_name.as_str());

    let registered = state
        .metadata
        .register_upload(&NewUpload {
            upload_id: *upload_id.as_uuid(),
            namespace,
            relative_path,
            file_name: file_name.into(),
            file_size,
            chunk_hashes,
            created_at: OffsetDateTime::now_utc(),
        })
        .await?;
    UPLOAD_SESSIONS_REGISTERED.inc();

    let session = registered.session.into_domain()?;
    let chunks = chunks_into_domain(registered.chunks)?;

    tracing::info!(
        version = session.version,
        chunks = chunks.len(),
        file_size = session.file_size,
        "upload registered"
    );

    if session.status == UploadStatus::Completed {
        UPLOAD_SESSIONS_COMPLETED.inc();
        state.completions.publish(UploadCompleted {
            upload_id: session.upload_id,
            file_name: session.file_name.clone(),
            version: session.version,
            chunks_total: session.chunks_total,
            completed_at: session.completed_at.unwrap_or(session.created_at),
        });
    }

    Ok(Json(StartUploadResponse {
        upload_id: session.upload_id,
        chunks,
    }))
}

/// GET /uploads/{upload_id} - Get a session with its chunk records.
pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let upload_id = UploadId::parse(&upload_id)?;

    let session = state
        .metadata
        .get_session(*upload_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("upload session {upload_id} not found")))?
        .into_domain()?;
    let chunks = chunks_into_domain(state.metadata.get_chunks(*upload_id.as_uuid()).await?)?;

    let completed_chunks = chunks
        .iter()
        .filter(|c| c.status == ChunkStatus::Completed)
        .count() as u64;
    let total_chunks = chunks.len() as u64;

    Ok(Json(UploadStatusResponse {
        upload: session,
        chunks,
        completed_chunks,
        total_chunks,
    }))
}
