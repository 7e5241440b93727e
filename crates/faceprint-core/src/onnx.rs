//! SCRFD + ArcFace backend.
//!
//! Detection runs on the full image; only the dominant (most confident)
//! face is embedded. The remaining faces are still reported so callers can
//! see how many were found.

use crate::backend::{FaceModel, FaceObservation, ModelError, ModelLoader, ModelOutput};
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use image::RgbImage;
use std::path::{Path, PathBuf};

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";
const INTRA_THREADS: usize = 2;

impl From<DetectorError> for ModelError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::ModelNotFound(path) => ModelError::Load(format!("detector model missing: {path}")),
            other => ModelError::Inference(other.to_string()),
        }
    }
}

impl From<RecognizerError> for ModelError {
    fn from(err: RecognizerError) -> Self {
        match err {
            RecognizerError::ModelNotFound(path) => {
                ModelError::Load(format!("recognizer model missing: {path}"))
            }
            other => ModelError::Inference(other.to_string()),
        }
    }
}

/// Loads the SCRFD detector and ArcFace recognizer from a model directory.
pub struct OnnxLoader {
    scrfd_path: PathBuf,
    arcface_path: PathBuf,
    intra_threads: usize,
}

impl OnnxLoader {
    pub fn from_model_dir(model_dir: &Path) -> Self {
        Self {
            scrfd_path: model_dir.join(SCRFD_MODEL_FILE),
            arcface_path: model_dir.join(ARCFACE_MODEL_FILE),
            intra_threads: INTRA_THREADS,
        }
    }
}

impl ModelLoader for OnnxLoader {
    fn name(&self) -> &str {
        "onnx"
    }

    fn load(&self) -> Result<Box<dyn FaceModel>, ModelError> {
        // Any failure here is a load failure, even one ort reports at runtime.
        let detector = FaceDetector::load(&self.scrfd_path, self.intra_threads)
            .map_err(|e| ModelError::Load(e.to_string()))?;
        let recognizer = FaceRecognizer::load(&self.arcface_path, self.intra_threads)
            .map_err(|e| ModelError::Load(e.to_string()))?;
        Ok(Box::new(OnnxModel { detector, recognizer }))
    }
}

pub struct OnnxModel {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceModel for OnnxModel {
    fn analyze(&mut self, image: &RgbImage) -> Result<ModelOutput, ModelError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ModelError::UnsupportedInput("empty pixel grid".into()));
        }

        let faces = self.detector.detect(image)?;
        tracing::debug!(count = faces.len(), "SCRFD detections");

        let mut observations = Vec::with_capacity(faces.len());
        for (rank, face) in faces.into_iter().enumerate() {
            let embedding = if rank == 0 {
                usable_embedding(self.recognizer.extract(image, &face))?
            } else {
                None
            };
            observations.push(FaceObservation {
                embedding,
                confidence: face.confidence,
                bbox: Some(face),
            });
        }

        Ok(ModelOutput::Many(observations))
    }
}

/// A face that cannot be aligned has no embedding; other failures propagate.
fn usable_embedding(
    extracted: Result<Vec<f32>, RecognizerError>,
) -> Result<Option<Vec<f32>>, ModelError> {
    match extracted {
        Ok(vector) => Ok(Some(vector)),
        Err(err @ (RecognizerError::NoLandmarks | RecognizerError::DegenerateLandmarks)) => {
            tracing::debug!(error = %err, "dominant face not embeddable");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}
