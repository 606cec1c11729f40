//! Frame type and pixel conversion — YUYV/MJPG to RGB, black-frame check.

use image::{imageops, ImageFormat, RgbImage};
use std::time::Instant;

/// Side of the thumbnail sampled by [`Frame::looks_black`].
const BLACK_SAMPLE_SIZE: u32 = 16;
/// Mean channel value below which a frame counts as black.
const BLACK_MEAN_THRESHOLD: f32 = 2.0;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// True when the frame is (nearly) all black — a covered lens, an IR
    /// sensor without illumination, or a camera that is still starting.
    ///
    /// Samples a 16×16 thumbnail rather than every pixel.
    pub fn looks_black(&self) -> bool {
        if self.image.width() == 0 || self.image.height() == 0 {
            return true;
        }
        let sample = imageops::thumbnail(&self.image, BLACK_SAMPLE_SIZE, BLACK_SAMPLE_SIZE);
        let channels = sample.as_raw();
        if channels.is_empty() {
            return true;
        }
        let mean = channels.iter().map(|&c| c as f32).sum::<f32>() / channels.len() as f32;
        mean < BLACK_MEAN_THRESHOLD
    }

    /// One-line capture diagnostics, e.g.
    /// `ready:true size:1280x720 fps:30 device:video0`.
    pub fn diagnostics(&self, fps: Option<f32>, device: &str) -> String {
        let ready = self.width() > 0 && self.height() > 0;
        let fps = fps.map_or_else(|| "?".to_string(), |f| format!("{f:.0}"));
        let device: String = device.trim_start_matches("/dev/").chars().take(6).collect();
        let mut note = format!(
            "ready:{ready} size:{}x{} fps:{fps} device:{device}",
            self.width(),
            self.height()
        );
        if ready && self.looks_black() {
            note.push_str(" (looks black)");
        }
        note
    }

    /// Encode the frame as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = std::io::Cursor::new(Vec::new());
        self.image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 limited-range YCbCr to RGB, integer arithmetic.
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_u8((298 * c + 409 * e + 128) >> 8),
        clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share the
/// chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected || width % 2 != 0 {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Decode a motion-JPEG buffer to RGB.
pub fn mjpeg_to_rgb(jpeg: &[u8]) -> Result<RgbImage, FrameError> {
    image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| FrameError::Decode(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame(image: RgbImage) -> Frame {
        Frame { image, timestamp: Instant::now(), sequence: 0 }
    }

    #[test]
    fn test_yuyv_to_rgb_gray_levels() {
        // Neutral chroma: black (Y=16) and white (Y=235).
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_dominant() {
        // High V (Cr) pushes red up and green down.
        let yuyv = vec![82, 90, 82, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let [r, g, b] = rgb.get_pixel(0, 0).0;
        assert!(r > 200 && g < 50 && b < 50, "got ({r}, {g}, {b})");
    }

    #[test]
    fn test_yuyv_dimensions() {
        let yuyv = vec![128u8; 4 * 2 * 2];
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.dimensions(), (4, 2));
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_mjpeg_garbage_is_error() {
        assert!(matches!(mjpeg_to_rgb(b"not a jpeg"), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_looks_black() {
        assert!(frame(RgbImage::new(64, 48)).looks_black());
        assert!(frame(RgbImage::from_pixel(64, 48, Rgb([1, 1, 1]))).looks_black());
        assert!(!frame(RgbImage::from_pixel(64, 48, Rgb([40, 30, 20]))).looks_black());
    }

    #[test]
    fn test_looks_black_empty() {
        assert!(frame(RgbImage::new(0, 0)).looks_black());
    }

    #[test]
    fn test_diagnostics_note() {
        let note = frame(RgbImage::from_pixel(32, 24, Rgb([90, 90, 90]))).diagnostics(Some(30.0), "/dev/video0");
        assert_eq!(note, "ready:true size:32x24 fps:30 device:video0");

        let dark = frame(RgbImage::new(32, 24)).diagnostics(None, "/dev/video12345");
        assert_eq!(dark, "ready:true size:32x24 fps:? device:video1 (looks black)");
    }

    #[test]
    fn test_png_encoding() {
        let png = frame(RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]))).to_png().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [10, 20, 30]);
    }
}
