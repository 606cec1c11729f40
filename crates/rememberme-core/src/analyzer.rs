//! The face analysis seam: image in, detected faces (with embeddings) out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::FaceRecognizer;
use crate::types::{DetectedFace, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// Finds faces in an image and, when a recognition model is available,
/// computes an embedding for each of them.
pub trait FaceAnalyzer {
    /// Detect faces, most confident first.
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError>;

    /// Whether embeddings are being produced at all.
    fn recognition_available(&self) -> bool;

    /// Version tag of the embedding model, if one is loaded.
    fn model_version(&self) -> Option<&str>;

    /// Embedding of the single most confident face in a still photo.
    ///
    /// `Ok(None)` when the photo has no detectable face or recognition is
    /// unavailable.
    fn reference_embedding(&mut self, image: &RgbImage) -> Result<Option<Embedding>, AnalyzerError> {
        Ok(self
            .analyze(image)?
            .into_iter()
            .next()
            .and_then(|face| face.embedding))
    }
}

/// SCRFD + ArcFace running on ONNX Runtime.
///
/// The recognizer is optional: without it detection still works and every
/// face comes back without an embedding.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: Option<FaceRecognizer>,
}

impl OnnxAnalyzer {
    /// Load both models. A detector failure is fatal; a recognizer failure
    /// only disables matching.
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(detector_path)?;

        let recognizer = match FaceRecognizer::load(recognizer_path) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(
                    path = recognizer_path,
                    error = %e,
                    "face recognition model failed to load; detection will work but matching is disabled"
                );
                None
            }
        };

        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self.detector.detect(image)?;

        let faces = boxes
            .into_iter()
            .map(|bbox| {
                let embedding = self.recognizer.as_mut().and_then(|r| match r.extract(image, &bbox) {
                    Ok(embedding) => Some(embedding),
                    Err(e) => {
                        tracing::debug!(error = %e, "embedding unavailable for face");
                        None
                    }
                });
                DetectedFace { bbox, embedding }
            })
            .collect();

        Ok(faces)
    }

    fn recognition_available(&self) -> bool {
        self.recognizer.is_some()
    }

    fn model_version(&self) -> Option<&str> {
        self.recognizer.as_ref().map(|r| r.model_version())
    }

    fn reference_embedding(&mut self, image: &RgbImage) -> Result<Option<Embedding>, AnalyzerError> {
        let Some(recognizer) = self.recognizer.as_mut() else {
            return Ok(None);
        };
        // Only the best face of a still photo is embedded.
        let Some(face) = self.detector.detect(image)?.into_iter().next() else {
            return Ok(None);
        };
        match recognizer.extract(image, &face) {
            Ok(embedding) => Ok(Some(embedding)),
            Err(e) => {
                tracing::warn!(error = %e, "could not extract a reference embedding");
                Ok(None)
            }
        }
    }
}
