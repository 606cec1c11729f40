//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame to 640×640, runs SCRFD, decodes the three
//! anchor-free stride levels and suppresses overlaps with NMS.

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
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty image")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detection thresholds.
#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    /// Minimum face score (exclusive).
    pub confidence_threshold: f32,
    /// IoU above which the weaker of two boxes is dropped.
    pub nms_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
        }
    }
}

/// Placement of the source image inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    scaled_w: u32,
    scaled_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let scaled_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let scaled_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            pad_x: (target - scaled_w) as f32 / 2.0,
            pad_y: (target - scaled_h) as f32 / 2.0,
            scaled_w,
            scaled_h,
        }
    }

    /// Map a point in model-input space back to source-image space.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    settings: DetectorSettings,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        Self::load_with(model_path, DetectorSettings::default())
    }

    pub fn load_with(model_path: &str, settings: DetectorSettings) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            settings,
            stride_indices,
        })
    }

    /// Detect faces in an RGB image, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let letterbox = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
        let input = preprocess(image, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[slot];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let level = StrideLevel {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            level.decode(&letterbox, self.settings.confidence_threshold, &mut candidates);
        }

        // nms() returns boxes in descending confidence order.
        Ok(nms(candidates, self.settings.nms_threshold))
    }
}

/// Letterbox-resize and normalize into a 1×3×640×640 RGB tensor.
///
/// Padding uses the mean value so it normalizes to exactly 0.0.
fn preprocess(image: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let size = SCRFD_INPUT_SIZE as usize;
    let resized = imageops::resize(image, letterbox.scaled_w, letterbox.scaled_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let x0 = letterbox.pad_x.floor() as u32;
    let y0 = letterbox.pad_y.floor() as u32;

    for y in 0..SCRFD_INPUT_SIZE {
        for x in 0..SCRFD_INPUT_SIZE {
            let inside = x >= x0 && y >= y0 && x < x0 + letterbox.scaled_w && y < y0 + letterbox.scaled_h;
            let rgb = if inside {
                let p = resized.get_pixel(x - x0, y - y0).0;
                [p[0] as f32, p[1] as f32, p[2] as f32]
            } else {
                [SCRFD_MEAN; 3]
            };
            for (c, value) in rgb.iter().enumerate() {
                tensor[[0, c, y as usize, x as usize]] = (value - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    tensor
}

/// Raw model outputs for one stride level.
struct StrideLevel<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

impl StrideLevel<'_> {
    /// Decode every anchor scoring above `threshold` into `out`, in source-image coordinates.
    fn decode(&self, letterbox: &Letterbox, threshold: f32, out: &mut Vec<BoundingBox>) {
        let grid_w = SCRFD_INPUT_SIZE as usize / self.stride;
        let grid_h = SCRFD_INPUT_SIZE as usize / self.stride;
        let step = self.stride as f32;

        for idx in 0..grid_w * grid_h * SCRFD_ANCHORS_PER_CELL {
            let score = self.scores.get(idx).copied().unwrap_or(0.0);
            if score <= threshold {
                continue;
            }
            let Some(dist) = self.bboxes.get(idx * 4..idx * 4 + 4) else {
                continue;
            };

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * step;
            let ay = (cell / grid_w) as f32 * step;

            let (x1, y1) = letterbox.to_source(ax - dist[0] * step, ay - dist[1] * step);
            let (x2, y2) = letterbox.to_source(ax + dist[2] * step, ay + dist[3] * step);

            let landmarks = self.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.to_source(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step)
                })
            });

            out.push(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            });
        }
    }
}

/// Discover output tensor ordering by name.
///
/// Exports named `score_8`, `bbox_16`, `kps_32`, ... are mapped by name.
/// Anything else falls back to the standard positional ordering:
/// [0-2] scores, [3-5] bboxes, [6-8] kps, each for strides 8/16/32.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Non-maximum suppression. Returns survivors in descending confidence order.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        let confidences: Vec<f32> = result.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_wide_image() {
        let lb = Letterbox::fit(1280, 720, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!((lb.scaled_w, lb.scaled_h), (640, 360));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 140.0));
    }

    #[test]
    fn test_letterbox_maps_back_to_source() {
        let lb = Letterbox::fit(320, 240, 640);
        let (x, y) = (100.0f32, 50.0f32);
        let (rx, ry) = lb.to_source(x * lb.scale + lb.pad_x, y * lb.scale + lb.pad_y);
        assert!((rx - x).abs() < 0.1 && (ry - y).abs() < 0.1, "({rx}, {ry})");
    }

    #[test]
    fn test_preprocess_padding_normalizes_to_zero() {
        let image = RgbImage::from_pixel(1280, 720, Rgb([255, 0, 128]));
        let lb = Letterbox::fit(1280, 720, 640);
        let tensor = preprocess(&image, &lb);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // Top padding band.
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        // Image area keeps channel order R, G, B.
        let r = tensor[[0, 0, 320, 320]];
        let g = tensor[[0, 1, 320, 320]];
        assert!((r - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-3);
        assert!((g - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-3);
    }

    #[test]
    fn test_decode_single_anchor() {
        // One anchor at cell (1, 0) of stride 32 on a 640x640 source (no letterbox).
        let lb = Letterbox::fit(640, 640, 640);
        let cells = 20 * 20 * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; cells];
        let mut bboxes = vec![0.0f32; cells * 4];
        let kps = vec![0.0f32; cells * 10];
        let idx = 2; // cell 1, first anchor
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.5, 1.0, 1.0]);

        let level = StrideLevel { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let mut out = Vec::new();
        level.decode(&lb, 0.5, &mut out);

        assert_eq!(out.len(), 1);
        let b = &out[0];
        assert_eq!((b.x, b.y), (32.0 - 16.0, -16.0));
        assert_eq!((b.width, b.height), (48.0, 48.0));
        assert_eq!(b.landmarks.map(|l| l[0]), Some((32.0, 0.0)));
    }

    #[test]
    fn test_decode_skips_low_scores() {
        let lb = Letterbox::fit(640, 640, 640);
        let cells = 80 * 80 * SCRFD_ANCHORS_PER_CELL;
        let scores = vec![0.5f32; cells];
        let bboxes = vec![1.0f32; cells * 4];
        let level = StrideLevel { stride: 8, scores: &scores, bboxes: &bboxes, kps: &[] };
        let mut out = Vec::new();
        level.decode(&lb, 0.5, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (428 + i).to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
