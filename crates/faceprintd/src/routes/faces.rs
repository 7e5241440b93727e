use super::run_blocking;
use super::upload::ImageUpload;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use faceprint_core::MatchOutcome;
use serde_json::json;
use std::sync::Arc;

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    upload: ImageUpload,
) -> ApiResult<impl IntoResponse> {
    let name = upload
        .name
        .ok_or_else(|| ApiError::BadRequest("missing name field".into()))?;
    let display_name = name.trim().to_string();
    let image = upload.image;

    let service = Arc::clone(&state.service);
    let id = run_blocking(move || service.register(&name, &image)).await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Face registered successfully for {display_name}"),
        "id": id,
    })))
}

/// POST /verify
pub async fn verify(
    State(state): State<AppState>,
    upload: ImageUpload,
) -> ApiResult<impl IntoResponse> {
    let image = upload.image;
    let service = Arc::clone(&state.service);
    let outcome = run_blocking(move || service.verify(&image)).await?;

    let body = match outcome {
        MatchOutcome::Match(m) => json!({
            "status": "success",
            "match_found": true,
            "match": {
                "id": m.id,
                "name": m.name,
                "confidence": round4(m.score),
            },
        }),
        MatchOutcome::NoMatch { .. } => json!({
            "status": "success",
            "match_found": false,
            "match": null,
            "message": "No matching face found",
        }),
    };
    Ok(Json(body))
}

/// GET /faces/{id}
pub async fn get_face(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let service = Arc::clone(&state.service);
    let summary = run_blocking(move || service.summary(id)).await?;
    Ok(Json(summary))
}

fn round4(score: f32) -> f64 {
    (f64::from(score) * 10_000.0).round() / 10_000.0
}
