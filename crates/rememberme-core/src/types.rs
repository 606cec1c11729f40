use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Euclidean distance between two embeddings, over their shared dimensions.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// One face found in an image by the analyzer.
///
/// `embedding` is `None` when the recognition model is unavailable or
/// failed on this particular face; the detection itself is still valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Option<Embedding>,
}

/// A gallery entry: one person's stored reference embedding.
#[derive(Debug, Clone)]
pub struct Reference {
    pub person_id: String,
    pub name: String,
    pub embedding: Embedding,
}

/// Maps an embedding distance onto a 0–100 similarity score.
///
/// `similarity = 100 * (1 - max(0, d - floor) / span)`, clamped to [0, 100].
///
/// The defaults are calibrated for unit-length ArcFace embeddings, where
/// `d = sqrt(2 - 2 * cos)`: a distance of 0.8 or less (cosine ≥ 0.68) scores
/// 100 and 1.4 or more (cosine ≤ 0.02) scores 0. With the default threshold
/// of 60 a match needs cosine above roughly 0.46.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScale {
    pub distance_floor: f32,
    pub distance_span: f32,
}

impl Default for SimilarityScale {
    fn default() -> Self {
        Self {
            distance_floor: 0.8,
            distance_span: 0.6,
        }
    }
}

impl SimilarityScale {
    pub fn similarity(&self, distance: f32) -> f32 {
        if !distance.is_finite() || self.distance_span <= 0.0 {
            return 0.0;
        }
        let excess = (distance - self.distance_floor).max(0.0);
        (100.0 * (1.0 - excess / self.distance_span)).clamp(0.0, 100.0)
    }
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance to the closest gallery entry (`inf` for an empty gallery).
    pub distance: f32,
    /// Similarity score of the closest entry, 0–100.
    pub similarity: f32,
    /// Person ID of the matched entry (if any).
    pub person_id: Option<String>,
    /// Name of the matched entry (if any).
    pub name: Option<String>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            distance: f32::INFINITY,
            similarity: 0.0,
            person_id: None,
            name: None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of references.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[Reference]) -> MatchResult;
}

/// Nearest-neighbour matcher on Euclidean distance.
///
/// Scans every gallery entry, keeps the closest one, and accepts it when its
/// similarity is strictly above `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    pub scale: SimilarityScale,
    /// Minimum similarity (exclusive, 0–100) for a positive match.
    pub threshold: f32,
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self {
            scale: SimilarityScale::default(),
            threshold: 60.0,
        }
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[Reference]) -> MatchResult {
        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, reference) in gallery.iter().enumerate() {
            if reference.embedding.dim() != probe.dim() {
                tracing::debug!(
                    person = %reference.name,
                    expected = probe.dim(),
                    actual = reference.embedding.dim(),
                    "skipping reference with mismatched dimension"
                );
                continue;
            }
            let distance = probe.euclidean_distance(&reference.embedding);
            tracing::trace!(person = %reference.name, distance, "compared reference");
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        let Some(idx) = best_idx else {
            return MatchResult::no_match();
        };

        let similarity = self.scale.similarity(best_distance);
        if similarity > self.threshold {
            MatchResult {
                matched: true,
                distance: best_distance,
                similarity,
                person_id: Some(gallery[idx].person_id.clone()),
                name: Some(gallery[idx].name.clone()),
            }
        } else {
            MatchResult {
                matched: false,
                distance: best_distance,
                similarity,
                person_id: None,
                name: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    fn reference(id: &str, values: &[f32]) -> Reference {
        Reference { person_id: id.into(), name: format!("person-{id}"), embedding: emb(values) }
    }

    #[test]
    fn test_euclidean_distance() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    /// Unit vectors in 2-D whose cosine similarity is `cos`.
    fn unit_pair(cos: f32) -> (Embedding, Embedding) {
        let sin = (1.0 - cos * cos).sqrt();
        (emb(&[1.0, 0.0]), emb(&[cos, sin]))
    }

    #[test]
    fn test_similarity_formula_points() {
        let scale = SimilarityScale { distance_floor: 0.4, distance_span: 0.3 };
        assert_eq!(scale.similarity(0.0), 100.0);
        assert_eq!(scale.similarity(0.4), 100.0);
        assert!((scale.similarity(0.5) - 66.666_67).abs() < 1e-3);
        assert!((scale.similarity(0.6) - 33.333_33).abs() < 1e-3);
        assert_eq!(scale.similarity(0.7), 0.0);
        assert_eq!(scale.similarity(2.0), 0.0);
    }

    #[test]
    fn test_default_scale_points() {
        let scale = SimilarityScale::default();
        assert_eq!(scale.similarity(0.8), 100.0);
        assert!((scale.similarity(0.95) - 75.0).abs() < 1e-3);
        assert!((scale.similarity(1.1) - 50.0).abs() < 1e-3);
        assert!(scale.similarity(1.4) < 1e-3);
        assert_eq!(scale.similarity(2.0), 0.0);
    }

    #[test]
    fn test_same_person_arcface_pair_matches() {
        let matcher = DistanceMatcher::default();
        for cos in [0.5, 0.6, 0.7, 0.8] {
            let (probe, stored) = unit_pair(cos);
            let result = matcher.compare(&probe, &[Reference {
                person_id: "ada".into(),
                name: "Ada".into(),
                embedding: stored,
            }]);
            assert!(result.matched, "cosine {cos} gave similarity {}", result.similarity);
        }
    }

    #[test]
    fn test_different_person_arcface_pair_does_not_match() {
        let matcher = DistanceMatcher::default();
        for cos in [0.0, 0.2, 0.35] {
            let (probe, stored) = unit_pair(cos);
            let result = matcher.compare(&probe, &[Reference {
                person_id: "bob".into(),
                name: "Bob".into(),
                embedding: stored,
            }]);
            assert!(!result.matched, "cosine {cos} gave similarity {}", result.similarity);
        }
    }

    #[test]
    fn test_similarity_non_finite_distance() {
        let scale = SimilarityScale::default();
        assert_eq!(scale.similarity(f32::INFINITY), 0.0);
        assert_eq!(scale.similarity(f32::NAN), 0.0);
    }

    #[test]
    fn test_matcher_picks_closest_entry() {
        // Best match is the last entry; every entry must be visited.
        let probe = emb(&[1.0, 0.0, 0.0]);
        let gallery = vec![
            reference("1", &[0.0, 1.0, 0.0]),
            reference("2", &[0.0, 0.0, 1.0]),
            reference("3", &[1.0, 0.1, 0.0]),
        ];

        let result = DistanceMatcher::default().compare(&probe, &gallery);
        assert!(result.matched);
        assert_eq!(result.person_id.as_deref(), Some("3"));
        assert_eq!(result.name.as_deref(), Some("person-3"));
        assert_eq!(result.similarity, 100.0);
    }

    #[test]
    fn test_matcher_below_threshold() {
        // Distance 1.1 → similarity 50, below the 60 threshold.
        let probe = emb(&[0.0, 0.0]);
        let gallery = vec![reference("1", &[1.1, 0.0])];

        let result = DistanceMatcher::default().compare(&probe, &gallery);
        assert!(!result.matched);
        assert!(result.person_id.is_none());
        assert!((result.similarity - 50.0).abs() < 1e-3);
        assert!((result.distance - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_threshold_is_exclusive() {
        let probe = emb(&[0.0]);
        let gallery = vec![reference("1", &[0.9])];
        let score = DistanceMatcher::default().compare(&probe, &gallery).similarity;
        assert!(score > 60.0);

        let at_score = DistanceMatcher { threshold: score, ..DistanceMatcher::default() };
        assert!(!at_score.compare(&probe, &gallery).matched);

        let below_score = DistanceMatcher { threshold: score - 0.01, ..DistanceMatcher::default() };
        assert!(below_score.compare(&probe, &gallery).matched);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let result = DistanceMatcher::default().compare(&emb(&[1.0, 0.0]), &[]);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_matcher_skips_mismatched_dimension() {
        let probe = emb(&[1.0, 0.0]);
        let gallery = vec![reference("wrong", &[1.0, 0.0, 0.0]), reference("right", &[1.0, 0.05])];
        let result = DistanceMatcher::default().compare(&probe, &gallery);
        assert_eq!(result.person_id.as_deref(), Some("right"));
    }

    #[test]
    fn test_matcher_tie_keeps_first() {
        let probe = emb(&[0.0, 0.0]);
        let gallery = vec![reference("a", &[0.1, 0.0]), reference("b", &[0.0, 0.1])];
        let result = DistanceMatcher::default().compare(&probe, &gallery);
        assert_eq!(result.person_id.as_deref(), Some("a"));
    }
}
