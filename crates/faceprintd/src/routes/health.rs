use super::run_blocking;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

/// GET /health
///
/// 200 when the database answers, 503 otherwise. The model is loaded lazily,
/// so an unloaded backend is reported but does not make the service unhealthy.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let service = Arc::clone(&state.service);
    let report = run_blocking(move || service.health()).await;

    let (status, body) = match report {
        Ok(report) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "database": "ok",
                "records": report.records,
                "backend": report.backend,
                "backend_loaded": report.backend_loaded,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        ),
        Err(err) => {
            tracing::error!(error = %err, "health check: database unavailable");
            let adapter = state.service.adapter();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "status": "degraded",
                    "database": "error",
                    "records": null,
                    "backend": adapter.backend_name(),
                    "backend_loaded": adapter.is_loaded(),
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )
        }
    };
    (status, Json(body))
}
