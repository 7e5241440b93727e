//! Face model backend interface.
//!
//! A backend is a [`ModelLoader`] that builds [`FaceModel`] instances. The
//! loader is chosen once at startup from [`BackendKind`]; the
//! [`BackendAdapter`](crate::BackendAdapter) owns initialization and calls.

use crate::onnx::OnnxLoader;
use crate::pixel::PixelLoader;
use crate::types::BoundingBox;
use image::RgbImage;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model load failed: {0}")]
    Load(String),
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
    #[error("no face detected")]
    NoFace,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

impl ModelError {
    /// Whether a different input path could succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ModelError::NoFace | ModelError::Load(_))
    }
}

/// One face reported by a model.
#[derive(Debug, Clone, Default)]
pub struct FaceObservation {
    /// Raw (unnormalized) embedding. `None` when the model located a face but
    /// produced no vector for it.
    pub embedding: Option<Vec<f32>>,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

/// Raw model output: a single record, or a list ordered dominant face first.
#[derive(Debug, Clone)]
pub enum ModelOutput {
    Single(FaceObservation),
    Many(Vec<FaceObservation>),
}

impl FaceObservation {
    /// The raw vector, treating an empty one as absent.
    pub fn into_vector(self) -> Option<Vec<f32>> {
        self.embedding.filter(|v| !v.is_empty())
    }
}

impl ModelOutput {
    /// The dominant face: the single record, or the first of many.
    pub fn into_dominant(self) -> Option<FaceObservation> {
        match self {
            ModelOutput::Single(face) => Some(face),
            ModelOutput::Many(faces) => faces.into_iter().next(),
        }
    }
}

/// A loaded detection + embedding model.
///
/// Implementations are not assumed to tolerate concurrent calls; the adapter
/// gives each instance to one caller at a time.
pub trait FaceModel: Send {
    /// Run detection and embedding on an in-memory RGB pixel grid.
    fn analyze(&mut self, image: &RgbImage) -> Result<ModelOutput, ModelError>;

    /// Run detection and embedding on an image file.
    fn analyze_file(&mut self, path: &Path) -> Result<ModelOutput, ModelError> {
        let image = image::open(path)?.to_rgb8();
        self.analyze(&image)
    }
}

/// Builds model instances. Loading may be slow; it is only ever invoked by
/// the adapter's one-time initialization.
pub trait ModelLoader: Send + Sync {
    fn name(&self) -> &str;
    fn load(&self) -> Result<Box<dyn FaceModel>, ModelError>;
}

/// Which backend to construct, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// SCRFD detection + ArcFace recognition via ONNX Runtime.
    Onnx,
    /// Deterministic pixel-statistics embedding, for development and tests.
    Pixel,
}

impl BackendKind {
    pub fn loader(self, model_dir: &Path) -> Box<dyn ModelLoader> {
        match self {
            BackendKind::Onnx => Box::new(OnnxLoader::from_model_dir(model_dir)),
            BackendKind::Pixel => Box::new(PixelLoader),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" | "arcface" => Ok(BackendKind::Onnx),
            "pixel" | "stub" => Ok(BackendKind::Pixel),
            other => Err(format!("unknown backend: {other} (expected onnx or pixel)")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Onnx => f.write_str("onnx"),
            BackendKind::Pixel => f.write_str("pixel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(embedding: Option<Vec<f32>>) -> FaceObservation {
        FaceObservation { embedding, confidence: 0.9, bbox: None }
    }

    fn dominant_vector(out: ModelOutput) -> Option<Vec<f32>> {
        out.into_dominant().and_then(FaceObservation::into_vector)
    }

    #[test]
    fn test_dominant_vector_single() {
        let out = ModelOutput::Single(face(Some(vec![1.0, 2.0])));
        assert_eq!(dominant_vector(out), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_dominant_takes_first_of_many() {
        let mut second = face(Some(vec![2.0]));
        second.confidence = 0.5;
        let out = ModelOutput::Many(vec![face(Some(vec![1.0])), second]);
        let dominant = out.into_dominant().unwrap();
        assert!((dominant.confidence - 0.9).abs() < 1e-6);
        assert_eq!(dominant.into_vector(), Some(vec![1.0]));
    }

    #[test]
    fn test_dominant_vector_missing_field() {
        assert_eq!(dominant_vector(ModelOutput::Single(face(None))), None);
        assert_eq!(dominant_vector(ModelOutput::Single(face(Some(vec![])))), None);
        assert_eq!(dominant_vector(ModelOutput::Many(vec![])), None);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("onnx".parse::<BackendKind>(), Ok(BackendKind::Onnx));
        assert_eq!(" Pixel ".parse::<BackendKind>(), Ok(BackendKind::Pixel));
        assert!("dlib".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Pixel.to_string(), "pixel");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ModelError::UnsupportedInput("grayscale".into()).is_retryable());
        assert!(ModelError::Inference("timeout".into()).is_retryable());
        assert!(!ModelError::NoFace.is_retryable());
        assert!(!ModelError::Load("missing".into()).is_retryable());
    }
}
