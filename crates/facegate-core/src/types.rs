use crate::quality::QualityReport;
use serde::{Deserialize, Serialize};

/// Axis-aligned face box in original-image pixel space.
///
/// Invariant for accepted detections: `x1 < x2`, `y1 < y2`, all four
/// coordinates within image bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Width over height; 0.0 for a degenerate box.
    pub fn aspect_ratio(&self) -> f32 {
        let h = self.height();
        if h > 0.0 {
            self.width() / h
        } else {
            0.0
        }
    }

    /// True when the box lies fully inside a `width` x `height` image.
    pub fn within(&self, width: u32, height: u32) -> bool {
        self.x1 >= 0.0 && self.y1 >= 0.0 && self.x2 <= width as f32 && self.y2 <= height as f32
    }
}

/// Five facial keypoints: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Which tier produced a detection.
///
/// Heuristic detections are synthesized from image geometry when the model
/// yields nothing; callers must treat them as strictly lower-trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Model,
    Heuristic,
}

/// One candidate face found in an image. Created per inference call, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    /// Raw model score, thresholded before acceptance; fixed constant for
    /// heuristic detections.
    pub confidence: f32,
    pub source: DetectionSource,
}

/// Binary gender category reported by the demographic estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// Face embedding vector (512-dimensional, L2-normalized on extraction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g. "w600k_r50"). Persisted so
    /// stale enrollments are detectable after a model upgrade.
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity between two embeddings, in [-1, 1].
    ///
    /// Constant-time over the vector length: always processes all
    /// dimensions, no early exit on mismatch.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// True when the vector is unit-norm within `epsilon`.
    pub fn is_unit_norm(&self, epsilon: f32) -> bool {
        (self.norm() - 1.0).abs() <= epsilon
    }
}

/// One fully processed face: detection, demographic attributes, embedding,
/// aligned crop, and quality. Transient; callers keep the highest-quality
/// one per image.
#[derive(Debug, Clone)]
pub struct FaceAnalysis {
    pub detection: FaceDetection,
    /// Estimated age in years, clamped to a plausible human range.
    pub age: u8,
    pub gender: Gender,
    /// Arbitrated demographic confidence in [0, 1], floored so downstream
    /// consumers never see zero.
    pub gender_confidence: f32,
    pub embedding: Embedding,
    /// Canonical 112x112 aligned crop the embedding was extracted from.
    pub aligned: image::RgbImage,
    pub quality: QualityReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding { values: vec![1.0, 0.0], model_version: None };
        let b = Embedding { values: vec![0.0, 1.0], model_version: None };
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding { values: vec![1.0, 0.0], model_version: None };
        let b = Embedding { values: vec![-1.0, 0.0], model_version: None };
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding { values: vec![0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0], model_version: None };
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_unit_norm_check() {
        let unit = Embedding { values: vec![0.6, 0.8], model_version: None };
        assert!(unit.is_unit_norm(1e-5));

        let long = Embedding { values: vec![3.0, 4.0], model_version: None };
        assert!(!long.is_unit_norm(1e-5));
        assert!((long.norm() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_dimensions() {
        let bbox = BoundingBox { x1: 10.0, y1: 20.0, x2: 110.0, y2: 220.0 };
        assert_eq!(bbox.width(), 100.0);
        assert_eq!(bbox.height(), 200.0);
        assert!((bbox.aspect_ratio() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_within_bounds() {
        let bbox = BoundingBox { x1: 0.0, y1: 0.0, x2: 640.0, y2: 480.0 };
        assert!(bbox.within(640, 480));
        assert!(!bbox.within(639, 480));

        let negative = BoundingBox { x1: -1.0, y1: 0.0, x2: 100.0, y2: 100.0 };
        assert!(!negative.within(640, 480));
    }

    #[test]
    fn test_degenerate_bbox_aspect() {
        let flat = BoundingBox { x1: 0.0, y1: 50.0, x2: 100.0, y2: 50.0 };
        assert_eq!(flat.aspect_ratio(), 0.0);
    }
}
