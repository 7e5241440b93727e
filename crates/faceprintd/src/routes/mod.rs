//! HTTP route handlers.
//!
//! - `faces`: register, verify, and record lookup
//! - `health`: liveness plus database and backend state
//! - `upload`: the multipart / JSON image extractor shared by `faces`

pub mod faces;
pub mod health;
pub mod upload;

use crate::error::{ApiError, ApiResult};
use axum::response::IntoResponse;
use axum::Json;
use faceprint_core::FaceError;
use serde_json::json;

/// Service info and endpoint list (GET /).
pub async fn api_info() -> impl IntoResponse {
    Json(json!({
        "name": "faceprint",
        "message": "Face registration and verification service",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "register": "POST /register",
            "verify": "POST /verify",
            "face": "GET /faces/{id}",
            "health": "GET /health",
        }
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Run blocking service work (decode, inference, SQLite) off the async
/// workers, inside the caller's span.
pub(crate) async fn run_blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, FaceError> + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(work))
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
        .map_err(ApiError::from)
}
