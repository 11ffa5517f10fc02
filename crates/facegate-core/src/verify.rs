//! Identity verification over stored and candidate embeddings.
//!
//! Similarity is cosine weighted by the geometric mean of the two capture
//! qualities, so a perfect cosine on murky inputs cannot clear the match
//! threshold. "No face in the candidate image" is a normal outcome with its
//! own constructor, not an error.

use crate::types::{DetectionSource, Embedding};
use serde::{Deserialize, Serialize};

// --- Named constants (no magic numbers) ---
/// Weighted similarity at or above which two captures count as the same person.
pub const MATCH_THRESHOLD: f32 = 0.65;
const HIGH_SIMILARITY: f32 = 0.8;
const HIGH_MEAN_QUALITY: f32 = 0.7;
const MEDIUM_SIMILARITY: f32 = 0.6;
const MEDIUM_MEAN_QUALITY: f32 = 0.5;

/// Categorical trust level for a verification decision.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

/// Provenance of the detection behind the candidate analysis.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DetectionSummary {
    pub source: DetectionSource,
    pub confidence: f32,
}

/// Outcome of one verification request.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerificationResult {
    pub is_match: bool,
    pub similarity: f32,
    pub confidence: ConfidenceTier,
    pub quality_score: f32,
    /// `None` when no face was found in the candidate image.
    pub detection: Option<DetectionSummary>,
}

impl VerificationResult {
    /// The fixed result for a candidate image with no detectable face.
    pub fn no_face() -> VerificationResult {
        VerificationResult {
            is_match: false,
            similarity: 0.0,
            confidence: ConfidenceTier::Low,
            quality_score: 0.0,
            detection: None,
        }
    }
}

/// Compare a stored enrollment embedding against a fresh candidate using
/// the default match threshold.
pub fn compare(
    stored: &Embedding,
    stored_quality: f32,
    candidate: &Embedding,
    candidate_quality: f32,
) -> (f32, bool, ConfidenceTier) {
    compare_with(stored, stored_quality, candidate, candidate_quality, MATCH_THRESHOLD)
}

/// [`compare`] with a calibrated match threshold. The confidence tiers are
/// fixed; only the match decision moves.
pub fn compare_with(
    stored: &Embedding,
    stored_quality: f32,
    candidate: &Embedding,
    candidate_quality: f32,
    match_threshold: f32,
) -> (f32, bool, ConfidenceTier) {
    let stored_quality = clamp_quality(stored_quality);
    let candidate_quality = clamp_quality(candidate_quality);

    let cosine = stored.similarity(candidate);
    let similarity = cosine * (stored_quality * candidate_quality).sqrt();

    let is_match = similarity >= match_threshold;
    let confidence = tier(similarity, (stored_quality + candidate_quality) / 2.0);

    (similarity, is_match, confidence)
}

/// Tier a similarity given the mean capture quality.
pub fn tier(similarity: f32, mean_quality: f32) -> ConfidenceTier {
    if similarity >= HIGH_SIMILARITY && mean_quality >= HIGH_MEAN_QUALITY {
        ConfidenceTier::High
    } else if similarity >= MEDIUM_SIMILARITY && mean_quality >= MEDIUM_MEAN_QUALITY {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

fn clamp_quality(quality: f32) -> f32 {
    if quality.is_finite() {
        quality.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
