//! faceprint-core — Face registration and verification engine.
//!
//! Turns an image into a unit-norm face embedding through a pluggable model
//! backend, stores embeddings as compact half-precision blobs, and matches a
//! query embedding against a stored corpus by cosine similarity.

pub mod adapter;
pub mod alignment;
pub mod backend;
pub mod codec;
pub mod detector;
pub mod error;
pub mod matcher;
pub mod onnx;
pub mod pixel;
pub mod recognizer;
pub mod service;
pub mod store;
pub mod types;

pub use adapter::BackendAdapter;
pub use backend::{BackendKind, FaceModel, FaceObservation, ModelError, ModelLoader, ModelOutput};
pub use codec::CodecError;
pub use error::FaceError;
pub use matcher::{CosineMatcher, Matcher};
pub use service::{FaceService, FaceSummary, HealthReport};
pub use store::{CorpusStore, MemoryCorpus, StoreError};
pub use types::{
    BoundingBox, CorpusEntry, EncodedEmbedding, Embedding, FaceRecord, MatchOutcome, MatchResult,
};

use std::path::PathBuf;

/// Default data directory (`$XDG_DATA_HOME/faceprint`).
pub fn default_data_dir() -> PathBuf {
    default_data_dir_with(|key| std::env::var(key).ok())
}

/// [`default_data_dir`] resolved through an arbitrary variable lookup.
pub fn default_data_dir_with(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceprint")
}

/// Default directory for ONNX model files.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}

/// Default corpus database path.
pub fn default_db_path() -> PathBuf {
    default_data_dir().join("faces.db")
}
