//! rememberme-core — Face detection, embedding and matching.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference. Matching is a linear
//! nearest-neighbour scan over per-person reference embeddings.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use detector::{DetectorError, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};
pub use types::{
    BoundingBox, DetectedFace, DistanceMatcher, Embedding, MatchResult, Matcher, Reference,
    SimilarityScale,
};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default directory searched for ONNX models.
///
/// `$XDG_DATA_HOME/rememberme/models`, falling back to
/// `~/.local/share/rememberme/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rememberme/models")
}
