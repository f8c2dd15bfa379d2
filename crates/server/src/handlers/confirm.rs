//! Chunk confirmation and session completion.

use crate::error::ApiResult;
use crate::handlers::common::{observe, read_form};
use crate::metrics::{
    CHUNKS_CONFIRMED, CHUNKS_CONFIRMED_REPEAT, CONFIRM_DURATION, UPLOAD_SESSIONS_COMPLETED,
};
use crate::state::AppState;
use axum::extract::{Request, State};
use std::time::Instant;
use stitch_core::{ChunkHash, UploadCompleted, UploadId};
use stitch_metadata::models::UploadSessionRow;
use time::OffsetDateTime;

/// Plain-text body returned for every successful confirmation.
pub const CHUNK_CONFIRMED: &str = "Chunk confirmed";

/// POST /confirm-chunk - Mark a chunk uploaded and complete the session when
/// it was the last one.
///
/// Repeating a confirmation is a no-op. Only the call whose transaction moved
/// the session to completed publishes the completion event.
#[tracing::instrument(skip(state, req), fields(upload_id, chunk_hash))]
pub async fn confirm_chunk(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<&'static str> {
    observe(confirm(&state, req).await)
}

async fn confirm(state: &AppState, req: Request) -> ApiResult<&'static str> {
    let form = read_form(state, req).await?;
    let upload_id = UploadId::parse(form.require("uploadID")?)?;
    let chunk_hash = ChunkHash::parse(form.require("chunkHash")?)?;

    let span = tracing::Span::current();
    span.record("upload_id", tracing::field::display(upload_id));
    span.record("chunk_hash", chunk_hash.as_str());

    let started = Instant::now();
    let outcome = state
        .metadata
        .confirm_chunk(
            *upload_id.as_uuid(),
            chunk_hash.as_str(),
            OffsetDateTime::now_utc(),
        )
        .await?;
    CONFIRM_DURATION.observe(started.elapsed().as_secs_f64());

    if outcome.chunk_newly_completed {
        CHUNKS_CONFIRMED.inc();
    } else {
        CHUNKS_CONFIRMED_REPEAT.inc();
    }

    tracing::debug!(
        completed = outcome.completed_chunks,
        total = outcome.total_chunks,
        status = %outcome.session_status,
        "chunk confirmed"
    );

    if outcome.transitioned {
        notify_completed(state, outcome.session)?;
    }

    Ok(CHUNK_CONFIRMED)
}

/// Publish the completion event from the row the confirming transaction read,
/// so the event never depends on a later lookup.
fn notify_completed(state: &AppState, session: UploadSessionRow) -> ApiResult<()> {
    UPLOAD_SESSIONS_COMPLETED.inc();

    let session = session.into_domain()?;
    state.completions.publish(UploadCompleted {
        upload_id: session.upload_id,
        file_name: session.file_name,
        version: session.version,
        chunks_total: session.chunks_total,
        completed_at: session.completed_at.unwrap_or(session.updated_at),
    });
    Ok(())
}
