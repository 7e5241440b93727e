//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto the canonical ArcFace 112×112 crop using the
//! five InsightFace reference landmarks and a least-squares fit.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [[a, -b], [b, a]] * src + [tx, ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst` points.
    ///
    /// Each pair contributes two rows to the normal equations:
    ///   [sx, -sy, 1, 0] · [a, b, tx, ty] = dx
    ///   [sy,  sx, 0, 1] · [a, b, tx, ty] = dy
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let mut ata = [[0.0f64; 4]; 4];
        let mut atb = [0.0f64; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy, dx, dy) = (sx as f64, sy as f64, dx as f64, dy as f64);
            let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
            for (row, target) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atb[j] += row[j] * target;
                }
            }
        }

        let [a, b, tx, ty] = solve_4x4(ata, atb)?;
        Some(Self {
            a: a as f32,
            b: b as f32,
            tx: tx as f32,
            ty: ty as f32,
        })
    }

    /// Map a destination (aligned) pixel back into the source image.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Gaussian elimination with partial pivoting. `None` for a singular system.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(mut m: [[f64; 4]; 4], mut rhs: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        if m[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        for row in col + 1..4 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        let tail: f64 = (i + 1..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample of one RGB pixel; outside the image reads as black.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let fetch = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let Rgb(c) = *image.get_pixel(px as u32, py as u32);
            [c[0] as f32, c[1] as f32, c[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr) = (fetch(x0, y0), fetch(x0 + 1, y0));
    let (bl, br) = (fetch(x0, y0 + 1), fetch(x0 + 1, y0 + 1));

    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Align a detected face to the canonical 112×112 ArcFace crop.
///
/// `None` when the landmarks admit no usable transform (coincident points,
/// or a fit that collapses to zero scale).
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> Option<RgbImage> {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112)?;
    // Invertibility depends only on the scale terms.
    transform.invert_point(0.0, 0.0)?;

    Some(RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => sample_bilinear(image, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    }))
}
