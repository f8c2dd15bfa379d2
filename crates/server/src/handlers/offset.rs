//! Positioned writes into target files.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::observe;
use crate::metrics::{OFFSET_BYTES_WRITTEN, OFFSET_WRITE_DURATION, OFFSET_WRITES};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_LENGTH;
use futures::TryStreamExt;
use serde::Deserialize;
use std::time::Instant;
use stitch_core::{ByteOffset, TargetName};
use stitch_storage::{ByteStream, StorageError};

/// Plain-text body returned for every successful offset write.
pub const CHUNK_UPLOADED: &str = "Chunk uploaded successfully";

/// Query parameters of `POST /upload`.
#[derive(Debug, Deserialize)]
pub struct OffsetWriteQuery {
    #[serde(rename = "fileName")]
    pub file_name: Option<String>,
    pub start: Option<String>,
}

/// POST /upload?fileName=..&start=.. - Write the request body into a target
/// file starting at byte `start`.
///
/// Writes to the same file are serialized; bytes outside the written range
/// are untouched. A failed write may leave a prefix of the body on disk, so
/// callers retry by resending the same range.
#[tracing::instrument(skip(state, query, headers, body), fields(target, offset))]
pub async fn upload_at_offset(
    State(state): State<AppState>,
    Query(query): Query<OffsetWriteQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<&'static str> {
    observe(write(&state, query, &headers, body).await)
}

async fn write(
    state: &AppState,
    query: OffsetWriteQuery,
    headers: &HeaderMap,
    body: Body,
) -> ApiResult<&'static str> {
    let name = TargetName::parse(
        query
            .file_name
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("fileName is required".to_string()))?,
    )?;
    let offset = ByteOffset::parse(
        query
            .start
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("start is required".to_string()))?,
    )?;

    let span = tracing::Span::current();
    span.record("target", name.as_str());
    span.record("offset", offset.get());

    let limits = state.write_limits();
    if let Some(declared) = content_length(headers)
        && declared > limits.max_write_size
    {
        return Err(ApiError::BadRequest(format!(
            "body of {declared} bytes exceeds maximum chunk size {}",
            limits.max_write_size
        )));
    }

    let stream: ByteStream = Box::pin(
        body.into_data_stream()
            .map_err(|e| StorageError::Body(e.to_string())),
    );

    let started = Instant::now();
    let written = state
        .targets
        .write_at(&name, offset.get(), stream, limits)
        .await?;
    OFFSET_WRITE_DURATION.observe(started.elapsed().as_secs_f64());
    OFFSET_WRITES.inc();
    OFFSET_BYTES_WRITTEN.inc_by(written);

    tracing::debug!(bytes = written, "offset write complete");
    Ok(CHUNK_UPLOADED)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
