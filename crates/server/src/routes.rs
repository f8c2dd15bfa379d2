//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Form bodies, multipart framing included, share one bound.
    let form_limit = DefaultBodyLimit::max(state.config.server.max_form_size);

    let upload_routes = Router::new()
        // Offset writes; the body is streamed to disk and bounded by the
        // storage write limits instead of the extractor default.
        .route(
            "/upload",
            post(handlers::upload_at_offset).layer(DefaultBodyLimit::disable()),
        )
        // Delegated writes
        .route(
            "/start-upload",
            post(handlers::start_upload).layer(form_limit),
        )
        .route("/get-signed-url", get(handlers::get_signed_url))
        .route(
            "/confirm-chunk",
            post(handlers::confirm_chunk).layer(form_limit),
        )
        .route("/uploads/{upload_id}", get(handlers::get_upload))
        .route("/health", get(handlers::health_check));

    let mut router = Router::new().merge(upload_routes);

    // See crate::metrics for the exposure requirements.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
