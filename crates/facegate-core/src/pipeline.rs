//! Pipeline orchestration: one handle owning all model sessions.
//!
//! A [`Pipeline`] is constructed once at process start and shared by
//! reference across request handlers. Per-call state lives on the stack, so
//! concurrent `analyze` calls are independent; the only serialization point
//! is each model's session lock.

use crate::demographics::{self, DemographicModel};
use crate::detector::{FaceDetector, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::embedder::{Embedder, EmbedderError};
use crate::types::FaceAnalysis;
use crate::{alignment, quality};
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where distribution packages install the model files.
pub const DEFAULT_MODEL_DIR: &str = "/usr/share/facegate/models";
const DETECTOR_FILE: &str = "det_10g.onnx";
const GENDERAGE_FILE: &str = "genderage.onnx";
const EMBEDDER_FILE: &str = "w600k_r50.onnx";

/// Upper bound on faces processed per image; detections beyond this are
/// already the weakest after confidence sorting.
const MAX_FACES_PER_IMAGE: usize = 8;

pub const DEFAULT_INTRA_THREADS: usize = 2;

/// Which model a pipeline error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Detector,
    Demographics,
    Embedder,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Detector => write!(f, "detector"),
            ModelKind::Demographics => write!(f, "demographics"),
            ModelKind::Embedder => write!(f, "embedder"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("required {kind} model unavailable: {reason}")]
    ModelUnavailable { kind: ModelKind, reason: String },
    #[error("embedding extraction failed: {0}")]
    Embedding(#[from] EmbedderError),
}

/// Model paths and inference settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub detector_model: PathBuf,
    /// Optional; absence only disables the model branch of demographic
    /// arbitration.
    pub demographics_model: Option<PathBuf>,
    pub embedder_model: PathBuf,
    pub detection_threshold: f32,
    pub intra_threads: usize,
}

impl PipelineConfig {
    /// Standard model file names under one directory.
    pub fn from_model_dir(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            detector_model: dir.join(DETECTOR_FILE),
            demographics_model: Some(dir.join(GENDERAGE_FILE)),
            embedder_model: dir.join(EMBEDDER_FILE),
            detection_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            intra_threads: DEFAULT_INTRA_THREADS,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig::from_model_dir(Path::new(DEFAULT_MODEL_DIR))
    }
}

/// Per-model load state, reported by health checks.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelAvailability {
    pub detector: bool,
    pub demographics: bool,
    pub embedder: bool,
}

/// All model sessions behind one handle.
#[derive(Debug)]
pub struct Pipeline {
    detector: FaceDetector,
    demographics: Option<DemographicModel>,
    embedder: Embedder,
}

impl Pipeline {
    /// Load every session. The detector and embedder are required; a
    /// missing demographic model only logs a warning.
    pub fn load(config: &PipelineConfig) -> Result<Pipeline, PipelineError> {
        let detector = FaceDetector::load(
            &config.detector_model,
            config.detection_threshold,
            config.intra_threads,
        )
        .map_err(|err| PipelineError::ModelUnavailable {
            kind: ModelKind::Detector,
            reason: err.to_string(),
        })?;

        let demographics = match &config.demographics_model {
            Some(path) => match DemographicModel::load(path, config.intra_threads) {
                Ok(model) => Some(model),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "demographic model unavailable, arbitration runs on the heuristic alone"
                    );
                    None
                }
            },
            None => None,
        };

        let embedder = Embedder::load(&config.embedder_model, config.intra_threads).map_err(
            |err| PipelineError::ModelUnavailable {
                kind: ModelKind::Embedder,
                reason: err.to_string(),
            },
        )?;

        tracing::info!(
            demographics = demographics.is_some(),
            "face pipeline ready"
        );

        Ok(Pipeline { detector, demographics, embedder })
    }

    pub fn availability(&self) -> ModelAvailability {
        ModelAvailability {
            detector: true,
            demographics: self.demographics.is_some(),
            embedder: true,
        }
    }

    /// Analyze every face in an image: detect, then per face align,
    /// resolve demographics, embed, and score quality.
    ///
    /// Never returns an empty vector on success; detection always yields at
    /// least a heuristic region. Only embedding failures abort the call.
    pub fn analyze(&self, image: &RgbImage) -> Result<Vec<FaceAnalysis>, PipelineError> {
        let detections = self.detector.detect(image);
        let total = detections.len();

        let mut analyses = Vec::with_capacity(total.min(MAX_FACES_PER_IMAGE));
        for detection in detections.into_iter().take(MAX_FACES_PER_IMAGE) {
            let aligned = alignment::align_face(image, &detection.bbox);

            let heuristic =
                demographics::analyze_pixels(&aligned, detection.bbox.aspect_ratio());
            let model_estimate =
                self.demographics.as_ref().and_then(|model| model.estimate(&aligned));
            let resolved = demographics::arbitrate(heuristic, model_estimate);

            let embedding = self.embedder.embed(&aligned)?;
            let quality = quality::assess(&aligned);

            tracing::debug!(
                source = ?detection.source,
                confidence = detection.confidence,
                age = resolved.resolved_age(),
                gender = ?resolved.gender,
                quality = quality.score,
                "face analyzed"
            );

            analyses.push(FaceAnalysis {
                detection,
                age: resolved.resolved_age(),
                gender: resolved.gender,
                gender_confidence: resolved.confidence,
                embedding,
                aligned,
                quality,
            });
        }

        if total > MAX_FACES_PER_IMAGE {
            tracing::debug!(total, kept = MAX_FACES_PER_IMAGE, "dropped excess detections");
        }

        Ok(analyses)
    }
}

/// The analysis worth keeping: highest quality score wins.
pub fn select_best(analyses: &[FaceAnalysis]) -> Option<&FaceAnalysis> {
    analyses.iter().max_by(|a, b| {
        a.quality
            .score
            .partial_cmp(&b.quality.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}
