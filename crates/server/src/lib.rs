//! HTTP coordinator for chunked file uploads.
//!
//! This crate provides the HTTP surface for both upload strategies:
//! - Offset writes streamed into local target files (`POST /upload`)
//! - Upload registration with a chunk manifest (`POST /start-upload`)
//! - Delegated write URLs for direct object-store uploads (`GET /get-signed-url`)
//! - Chunk confirmation and exactly-once session completion (`POST /confirm-chunk`)

pub mod completion;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use completion::CompletionNotifier;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
