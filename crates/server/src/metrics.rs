//! Prometheus metrics for the stitch server.
//!
//! Exposes counters for both upload strategies, confirmation latency and
//! errors by type.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no file names, hashes or upload IDs, only aggregate counts.
//! Restrict the endpoint to scraper addresses at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload session metrics
pub static UPLOAD_SESSIONS_REGISTERED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_upload_sessions_registered_total",
        "Total number of upload sessions registered",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_upload_sessions_completed_total",
        "Total number of upload sessions that reached completed",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static CHUNKS_CONFIRMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_chunks_confirmed_total",
        "Total number of chunk records moved to completed",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_CONFIRMED_REPEAT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_chunks_confirmed_repeat_total",
        "Total number of confirmations for chunks that were already completed",
    )
    .expect("metric creation failed")
});

pub static SIGNED_URLS_ISSUED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_signed_urls_issued_total",
        "Total number of delegated write URLs issued",
    )
    .expect("metric creation failed")
});

// Offset write metrics
pub static OFFSET_WRITES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_offset_writes_total",
        "Total number of successful offset writes",
    )
    .expect("metric creation failed")
});

pub static OFFSET_BYTES_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_offset_bytes_written_total",
        "Total bytes written by offset writes",
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static OFFSET_WRITE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stitch_offset_write_duration_seconds",
            "Time taken to write one offset chunk, including lock wait",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("metric creation failed")
});

pub static CONFIRM_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stitch_chunk_confirm_duration_seconds",
            "Time taken to confirm a chunk and evaluate session completion",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
    )
    .expect("metric creation failed")
});

// Error metrics
pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stitch_upload_errors_total",
            "Total upload errors by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests may build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_REGISTERED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_CONFIRMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_CONFIRMED_REPEAT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SIGNED_URLS_ISSUED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OFFSET_WRITES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OFFSET_BYTES_WRITTEN.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OFFSET_WRITE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CONFIRM_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
