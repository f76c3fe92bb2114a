//! Face alignment via a 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace reference layout
//! and warps the face into the 112×112 RGB crop ArcFace expects.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit from `src` points onto `dst` points.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut norm = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }

        if norm < 1e-12 {
            // Degenerate landmarks: translate only.
            return Self { a: 1.0, b: 0.0, tx: mdx - msx, ty: mdy - msy };
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Map an output point back into the source image.
    fn invert(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some(((self.a * dx + self.b * dy) / det, (-self.b * dx + self.a * dy) / det))
    }
}

/// Bilinear sample; out-of-bounds neighbours read as black.
fn sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let (w, h) = (img.width() as i64, img.height() as i64);

    let px = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let Rgb(c) = *img.get_pixel(px as u32, py as u32);
            [c[0] as f32, c[1] as f32, c[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Align a detected face to a canonical 112×112 RGB crop.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::fit(landmarks, &REFERENCE_LANDMARKS);
    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        match transform.invert((ox as f32, oy as f32)) {
            Some((sx, sy)) => sample(frame, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}
