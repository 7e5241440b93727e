//! Deterministic pixel-statistics backend.
//!
//! Produces a 512-dim vector from a 16×32 grayscale thumbnail with the mean
//! removed. No model files, no detection: identical images map to identical
//! vectors, brightness and contrast shifts barely move them, and unrelated
//! images land near-orthogonal. A featureless (uniform) image reports no face.

use crate::backend::{FaceModel, FaceObservation, ModelError, ModelLoader, ModelOutput};
use image::imageops::{self, FilterType};
use image::RgbImage;

pub const PIXEL_GRID_WIDTH: u32 = 16;
pub const PIXEL_GRID_HEIGHT: u32 = 32;
pub const PIXEL_EMBEDDING_DIM: usize = (PIXEL_GRID_WIDTH * PIXEL_GRID_HEIGHT) as usize;

/// Minimum per-cell variance (in squared grey levels) to count as a face.
const MIN_VARIANCE: f32 = 1e-3;

pub struct PixelLoader;

impl ModelLoader for PixelLoader {
    fn name(&self) -> &str {
        "pixel"
    }

    fn load(&self) -> Result<Box<dyn FaceModel>, ModelError> {
        Ok(Box::new(PixelModel))
    }
}

pub struct PixelModel;

impl FaceModel for PixelModel {
    fn analyze(&mut self, image: &RgbImage) -> Result<ModelOutput, ModelError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ModelError::UnsupportedInput("empty pixel grid".into()));
        }

        let gray = imageops::grayscale(image);
        let grid = imageops::resize(&gray, PIXEL_GRID_WIDTH, PIXEL_GRID_HEIGHT, FilterType::Triangle);
        let cells: Vec<f32> = grid.pixels().map(|p| f32::from(p.0[0])).collect();

        let mean = cells.iter().sum::<f32>() / cells.len() as f32;
        let centered: Vec<f32> = cells.iter().map(|v| v - mean).collect();
        let variance = centered.iter().map(|v| v * v).sum::<f32>() / centered.len() as f32;

        if variance < MIN_VARIANCE {
            tracing::debug!(variance, "pixel backend: featureless image");
            return Ok(ModelOutput::Many(Vec::new()));
        }

        Ok(ModelOutput::Single(FaceObservation {
            embedding: Some(centered),
            confidence: 1.0,
            bbox: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::normalize;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 7 + y * 3) % 200) as u8 + 20;
            Rgb([v, v / 2, 255 - v])
        })
    }

    fn embed(image: &RgbImage) -> Vec<f32> {
        let raw = PixelModel
            .analyze(image)
            .unwrap()
            .into_dominant()
            .and_then(FaceObservation::into_vector)
            .unwrap();
        normalize(&raw).unwrap().into_values()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_dimension() {
        assert_eq!(embed(&gradient(64, 64)).len(), PIXEL_EMBEDDING_DIM);
        assert_eq!(PIXEL_EMBEDDING_DIM, 512);
    }

    #[test]
    fn test_deterministic() {
        let img = gradient(90, 120);
        assert_eq!(embed(&img), embed(&img));
    }

    #[test]
    fn test_brightness_shift_stays_close() {
        let img = gradient(80, 80);
        let brighter = RgbImage::from_fn(80, 80, |x, y| {
            let Rgb([r, g, b]) = *img.get_pixel(x, y);
            Rgb([r.saturating_add(15), g.saturating_add(15), b])
        });
        assert!(cosine(&embed(&img), &embed(&brighter)) > 0.9);
    }

    #[test]
    fn test_uniform_image_has_no_face() {
        let flat = RgbImage::from_pixel(40, 40, Rgb([128, 128, 128]));
        let out = PixelModel.analyze(&flat).unwrap();
        assert!(out.into_dominant().is_none());
    }

    #[test]
    fn test_empty_grid_is_unsupported() {
        assert!(matches!(
            PixelModel.analyze(&RgbImage::new(0, 0)),
            Err(ModelError::UnsupportedInput(_))
        ));
    }
}
