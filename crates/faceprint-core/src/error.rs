use crate::backend::ModelError;
use crate::codec::CodecError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by register / verify / lookup.
///
/// Every lower-layer error is folded into one of these kinds so the service
/// boundary can map them to client or server failures.
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("face backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("embedding has zero norm")]
    ZeroNorm,
    #[error("stored embedding is corrupt: {0}")]
    Decode(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("face record {0} not found")]
    NotFound(i64),
}

impl From<CodecError> for FaceError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::ZeroNorm => FaceError::ZeroNorm,
            CodecError::NonFinite => {
                FaceError::BackendUnavailable("model produced a non-finite embedding".into())
            }
            CodecError::Encode(msg) => FaceError::Storage(msg),
            CodecError::Decode(msg) => FaceError::Decode(msg),
        }
    }
}

impl From<StoreError> for FaceError {
    fn from(err: StoreError) -> Self {
        FaceError::Storage(err.to_string())
    }
}

impl From<ModelError> for FaceError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NoFace => FaceError::NoFaceDetected,
            ModelError::UnsupportedInput(msg) => FaceError::Input(msg),
            other => FaceError::BackendUnavailable(other.to_string()),
        }
    }
}
