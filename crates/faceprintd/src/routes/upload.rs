use crate::error::ApiError;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

/// An image submitted either as a multipart form (`name` text field, `file`
/// part) or as JSON (`{"name": ..., "image": "<base64>"}`).
#[derive(Debug)]
pub struct ImageUpload {
    pub name: Option<String>,
    pub image: Vec<u8>,
}

#[derive(Deserialize)]
struct JsonUpload {
    name: Option<String>,
    image: String,
}

impl<S: Send + Sync> FromRequest<S> for ImageUpload {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
            from_multipart(multipart).await
        } else if content_type.starts_with("application/json") {
            let Json(body) = Json::<JsonUpload>::from_request(req, state)
                .await
                .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
            let image = STANDARD
                .decode(body.image.trim())
                .map_err(|e| ApiError::BadRequest(format!("image is not valid base64: {e}")))?;
            Ok(Self { name: body.name, image })
        } else {
            Err(ApiError::BadRequest(
                "expected multipart/form-data or application/json".into(),
            ))
        }
    }
}

async fn from_multipart(mut multipart: Multipart) -> Result<ImageUpload, ApiError> {
    let mut name = None;
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?
    {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
                name = Some(text);
            }
            Some("file") => {
                if let Some(content_type) = field.content_type() {
                    if !content_type.starts_with("image/") {
                        return Err(ApiError::BadRequest(format!(
                            "file must be an image, got {content_type}"
                        )));
                    }
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
                image = Some(bytes.to_vec());
            }
            other => tracing::debug!(field = ?other, "ignoring unknown form field"),
        }
    }

    let image = image.ok_or_else(|| ApiError::BadRequest("missing file field".into()))?;
    Ok(ImageUpload { name, image })
}
