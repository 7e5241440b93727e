use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use faceprint_core::FaceError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Face(#[from] FaceError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Map an axum extractor rejection, keeping the 413 for oversized bodies.
    pub fn rejected(status: StatusCode, message: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BadRequest(message)
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Face(err) => match err {
                FaceError::Input(_) => StatusCode::BAD_REQUEST,
                FaceError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
                FaceError::NotFound(_) => StatusCode::NOT_FOUND,
                FaceError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                FaceError::ZeroNorm | FaceError::Decode(_) | FaceError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Face(err) => match err {
                FaceError::Input(_) => "INVALID_INPUT",
                FaceError::NoFaceDetected => "NO_FACE_DETECTED",
                FaceError::NotFound(_) => "NOT_FOUND",
                FaceError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
                FaceError::ZeroNorm => "ZERO_NORM",
                FaceError::Decode(_) => "CORRUPT_EMBEDDING",
                FaceError::Storage(_) => "STORAGE_ERROR",
            },
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-facing message. Server-side details stay in the log.
    fn public_message(&self) -> String {
        match self {
            ApiError::Face(FaceError::BackendUnavailable(_)) => {
                "face recognition backend is unavailable".to_string()
            }
            other if other.status_code().is_server_error() => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.public_message(),
            }
        }));

        (status, body).into_response()
    }
}
