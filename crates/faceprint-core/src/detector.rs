//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model on a letterboxed RGB image, decodes the three stride
//! heads anchor-free, and suppresses overlaps with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_IOU: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_OUTPUT_COUNT: usize = 9;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Placement of the source image inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(src_width: u32, src_height: u32, target: u32) -> Self {
        let scale = (target as f32 / src_width as f32).min(target as f32 / src_height as f32);
        let width = ((src_width as f32 * scale).round() as u32).clamp(1, target);
        let height = ((src_height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            width,
            height,
            pad_x: (target - width) / 2,
            pad_y: (target - height) / 2,
        }
    }

    /// Map a point in model-input space back to source image space.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor positions of one stride head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < SCRFD_OUTPUT_COUNT {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model with landmarks has {SCRFD_OUTPUT_COUNT} outputs, got {}",
                output_names.len()
            )));
        }

        let heads = map_stride_outputs(&output_names);
        tracing::debug!(?heads, "SCRFD output mapping");

        Ok(Self { session, heads })
    }

    /// Detect faces, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (head, &stride) in self.heads.iter().zip(SCRFD_STRIDES.iter()) {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = tensor(head.score, "scores")?;
            let boxes = tensor(head.bbox, "boxes")?;
            let kps = tensor(head.kps, "landmarks")?;

            candidates.extend(decode_stride(scores, boxes, kps, stride, &letterbox));
        }

        Ok(nms(candidates, SCRFD_NMS_IOU))
    }
}

/// Letterbox an RGB image into a 1×3×640×640 tensor normalized for SCRFD.
/// Padding is left at zero, which is the normalized mean.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
    let resized = imageops::resize(image, letterbox.width, letterbox.height, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        for (channel, &value) in pixel.0.iter().enumerate() {
            tensor[[0, channel, ty, tx]] = (value as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Find each stride's score/bbox/kps tensors.
///
/// Exports that name their heads ("score_8", "bbox_16", "kps_32", ...) are
/// mapped by name. Anything else gets the standard positional layout:
/// scores at 0–2, boxes at 3–5, landmarks at 6–8.
fn map_stride_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
                kps: position("kps", stride)?,
            })
        })
        .collect();

    match named {
        Some(heads) => {
            tracing::info!("SCRFD: mapping outputs by name");
            [heads[0], heads[1], heads[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional layout");
            std::array::from_fn(|i| StrideOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Decode one stride head into candidate boxes in source-image coordinates.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut found = Vec::new();
    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= SCRFD_SCORE_THRESHOLD {
            continue;
        }
        let Some(offsets) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * step;
        let cy = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_source(cx - offsets[0] * step, cy - offsets[1] * step);
        let (x2, y2) = letterbox.to_source(cx + offsets[2] * step, cy + offsets[3] * step);

        let landmarks: Option<[(f32, f32); 5]> = kps.get(idx * 10..idx * 10 + 10).map(|points| {
            std::array::from_fn(|i| {
                letterbox.to_source(cx + points[i * 2] * step, cy + points[i * 2 + 1] * step)
            })
        });

        found.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    found
}

/// Greedy non-maximum suppression; returns survivors by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
