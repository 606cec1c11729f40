//! Face alignment onto the canonical ArcFace crop.
//!
//! A detected face is mapped onto 112×112 by the similarity transform
//! (uniform scale, rotation, translation) that best fits its five landmarks
//! to the InsightFace reference positions.

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

/// 4-DOF similarity transform:
///
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub const IDENTITY: Similarity = Similarity { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares fit of `src` onto `dst`.
    ///
    /// Closed form on centred coordinates. Degenerate input (all source
    /// points coincide) yields the identity.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut denom = 0.0f32;
        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            denom += sx * sx + sy * sy;
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
        }

        if denom < 1e-12 {
            return Self::IDENTITY;
        }

        let a = num_a / denom;
        let b = num_b / denom;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, or `None` when the transform collapses to a point.
    pub fn inverse(&self) -> Option<Similarity> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        Some(Similarity {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }
}

/// Bilinear sample; pixels outside the image read as black.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let fetch = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && py >= 0 && (px as u32) < image.width() && (py as u32) < image.height() {
            let p = image.get_pixel(px as u32, py as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = fetch(x0, y0);
    let tr = fetch(x0 + 1, y0);
    let bl = fetch(x0, y0 + 1);
    let br = fetch(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Warp `image` into an `out_size`×`out_size` crop where output pixel `p`
/// comes from source position `transform⁻¹(p)`.
pub fn warp(image: &RgbImage, transform: &Similarity, out_size: u32) -> RgbImage {
    let Some(inverse) = transform.inverse() else {
        return RgbImage::new(out_size, out_size);
    };
    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let (sx, sy) = inverse.apply((ox as f32, oy as f32));
        sample_bilinear(image, sx, sy)
    })
}

/// Align a detected face to the canonical 112×112 ArcFace crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    warp(image, &transform, ALIGNED_SIZE)
}
