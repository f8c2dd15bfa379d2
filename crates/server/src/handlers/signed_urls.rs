//! Delegated write URL issuance.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::observe;
use crate::metrics::SIGNED_URLS_ISSUED;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use stitch_core::upload::SignedUrlResponse;
use stitch_core::{ChunkHash, UploadId};
use time::OffsetDateTime;

/// Query parameters of `GET /get-signed-url`.
#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    #[serde(rename = "uploadID")]
    pub upload_id: Option<String>,
    #[serde(rename = "chunkHash")]
    pub chunk_hash: Option<String>,
}

/// GET /get-signed-url - Issue a presigned PUT for one chunk.
///
/// The object key is the chunk's content hash. The URL is stored on every
/// chunk record of the session carrying that hash, replacing any earlier one.
#[tracing::instrument(skip(state, query), fields(upload_id, chunk_hash))]
pub async fn get_signed_url(
    State(state): State<AppState>,
    Query(query): Query<SignedUrlQuery>,
) -> ApiResult<Json<SignedUrlResponse>> {
    observe(issue(&state, query).await)
}

async fn issue(state: &AppState, query: SignedUrlQuery) -> ApiResult<Json<SignedUrlResponse>> {
    let signer = state.signer.as_ref().ok_or_else(|| {
        ApiError::Unavailable("no object store is configured for delegated writes".to_string())
    })?;

    let upload_id = UploadId::parse(
        query
            .upload_id
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("uploadID is required".to_string()))?,
    )?;
    let chunk_hash = ChunkHash::parse(
        query
            .chunk_hash
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("chunkHash is required".to_string()))?,
    )?;

    let span = tracing::Span::current();
    span.record("upload_id", tracing::field::display(upload_id));
    span.record("chunk_hash", chunk_hash.as_str());

    // Unknown pairs must not reach the signer or touch any record.
    state
        .metadata
        .get_chunk(*upload_id.as_uuid(), chunk_hash.as_str())
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "chunk {chunk_hash} not found in upload {upload_id}"
            ))
        })?;

    let ttl = state.config.server.signed_url_ttl();
    let presigned = signer.presign_put(chunk_hash.as_str(), ttl).await?;

    let updated = state
        .metadata
        .record_signed_url(
            *upload_id.as_uuid(),
            chunk_hash.as_str(),
            &presigned.url,
            &presigned.object_key,
            presigned.expires_at,
            OffsetDateTime::now_utc(),
        )
        .await?;
    SIGNED_URLS_ISSUED.inc();

    tracing::debug!(
        records = updated,
        object_key = %presigned.object_key,
        backend = signer.backend_name(),
        "signed url issued"
    );

    Ok(Json(SignedUrlResponse {
        signed_url: presigned.url,
    }))
}
