//! Enrollment and verification service.
//!
//! [`FaceService`] owns the enrollment store and a lazily loaded
//! [`Pipeline`]. Model loading happens once, on the first call that needs
//! it; concurrent callers share the same in-flight initialization through a
//! [`tokio::sync::OnceCell`]. Inference runs on the blocking pool so the
//! async runtime stays responsive.

use crate::config::Config;
use crate::crypto::{CryptoError, Sealer};
use crate::store::{EnrollmentStore, EnrollmentSummary, FaceFeatures, StoreError};
use facegate_core::pipeline::select_best;
use facegate_core::{
    verify, BoundingBox, DetectionSource, DetectionSummary, FaceAnalysis, Gender,
    ModelAvailability, Pipeline, PipelineConfig, PipelineError, QualityReport,
    VerificationResult,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::task;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("no usable face found in the image")]
    NoFaceDetected,
    #[error("no enrollment for identity {0}")]
    NoEnrollment(String),
    #[error("image decode failed: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("worker task failed: {0}")]
    Join(String),
}

impl ServiceError {
    /// Message safe to show an end user. Configuration problems stay
    /// generic here and go to the operator through logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            ServiceError::NoFaceDetected | ServiceError::InvalidImage(_) => {
                "face not usable, please retake the photo"
            }
            ServiceError::NoEnrollment(_) => "identity is not enrolled",
            _ => "verification service temporarily unavailable",
        }
    }
}

/// Outcome of a successful enrollment.
#[derive(Serialize, Debug, Clone)]
pub struct EnrollmentReceipt {
    pub identity_id: String,
    pub record_id: String,
    pub quality: f32,
    pub detection_source: DetectionSource,
    /// How many faces the image contained; the best one was stored.
    pub faces_considered: usize,
}

/// Per-face analysis summary. Deliberately excludes the embedding vector;
/// raw biometric features never leave the service.
#[derive(Serialize, Debug, Clone)]
pub struct FaceReport {
    pub bbox: BoundingBox,
    pub detection_confidence: f32,
    pub source: DetectionSource,
    pub age: u8,
    pub gender: Gender,
    pub gender_confidence: f32,
    pub quality: QualityReport,
    pub embedding_dim: usize,
    pub model_version: Option<String>,
}

impl FaceReport {
    fn of(analysis: &FaceAnalysis) -> FaceReport {
        FaceReport {
            bbox: analysis.detection.bbox,
            detection_confidence: analysis.detection.confidence,
            source: analysis.detection.source,
            age: analysis.age,
            gender: analysis.gender,
            gender_confidence: analysis.gender_confidence,
            quality: analysis.quality,
            embedding_dim: analysis.embedding.values.len(),
            model_version: analysis.embedding.model_version.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Serialize, Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub models: ModelAvailability,
    pub pipeline_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request-facing service handle. Cheap to share by reference; all methods
/// take `&self` and are safe to call concurrently.
pub struct FaceService {
    pipeline_config: PipelineConfig,
    pipeline: OnceCell<Arc<Pipeline>>,
    store: EnrollmentStore,
    match_threshold: f32,
}

impl FaceService {
    pub async fn new(config: &Config) -> Result<FaceService, ServiceError> {
        let sealer = Sealer::from_secret_file(&config.secret_path)?;
        let store = EnrollmentStore::open(&config.db_path, sealer).await?;
        Ok(FaceService {
            pipeline_config: config.pipeline_config(),
            pipeline: OnceCell::new(),
            store,
            match_threshold: config.match_threshold,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_store(pipeline_config: PipelineConfig, store: EnrollmentStore) -> FaceService {
        FaceService {
            pipeline_config,
            pipeline: OnceCell::new(),
            store,
            match_threshold: verify::MATCH_THRESHOLD,
        }
    }

    /// Load the models if they are not loaded yet. Idempotent; concurrent
    /// callers all await the same initialization.
    pub async fn ensure_initialized(&self) -> Result<(), ServiceError> {
        self.pipeline().await.map(|_| ())
    }

    async fn pipeline(&self) -> Result<Arc<Pipeline>, ServiceError> {
        let pipeline = self
            .pipeline
            .get_or_try_init(|| async {
                let config = self.pipeline_config.clone();
                let pipeline = task::spawn_blocking(move || Pipeline::load(&config))
                    .await
                    .map_err(|err| ServiceError::Join(err.to_string()))??;
                Ok::<_, ServiceError>(Arc::new(pipeline))
            })
            .await?;
        Ok(Arc::clone(pipeline))
    }

    /// Decode and analyze an image on the blocking pool.
    async fn run_analysis(&self, image_bytes: &[u8]) -> Result<Vec<FaceAnalysis>, ServiceError> {
        let image = image::load_from_memory(image_bytes)?.to_rgb8();
        let pipeline = self.pipeline().await?;
        let analyses = task::spawn_blocking(move || pipeline.analyze(&image))
            .await
            .map_err(|err| ServiceError::Join(err.to_string()))??;
        Ok(analyses)
    }

    /// Run full analysis and store the best face's embedding for
    /// `identity_id`, replacing any previous enrollment.
    pub async fn enroll(
        &self,
        identity_id: &str,
        image_bytes: &[u8],
        metadata: Option<String>,
    ) -> Result<EnrollmentReceipt, ServiceError> {
        let analyses = self.run_analysis(image_bytes).await?;
        let best = select_best(&analyses).ok_or(ServiceError::NoFaceDetected)?;

        let features = FaceFeatures::of(best);
        let record_id = self
            .store
            .save(identity_id, &best.embedding, &features, metadata)
            .await?;

        tracing::info!(
            identity = identity_id,
            quality = best.quality.score,
            source = ?best.detection.source,
            faces = analyses.len(),
            "identity enrolled"
        );

        Ok(EnrollmentReceipt {
            identity_id: identity_id.to_string(),
            record_id,
            quality: best.quality.score,
            detection_source: best.detection.source,
            faces_considered: analyses.len(),
        })
    }

    /// Verify a fresh image against the stored enrollment. "No face found"
    /// is a normal non-match result, not an error.
    pub async fn verify(
        &self,
        identity_id: &str,
        image_bytes: &[u8],
    ) -> Result<VerificationResult, ServiceError> {
        let record = self
            .store
            .load(identity_id)
            .await?
            .ok_or_else(|| ServiceError::NoEnrollment(identity_id.to_string()))?;

        let analyses = self.run_analysis(image_bytes).await?;
        let best = match select_best(&analyses) {
            Some(best) => best,
            None => {
                tracing::info!(identity = identity_id, "no face in candidate image");
                return Ok(VerificationResult::no_face());
            }
        };

        let (similarity, is_match, confidence) = verify::compare_with(
            &record.embedding,
            record.features.quality,
            &best.embedding,
            best.quality.score,
            self.match_threshold,
        );

        tracing::info!(
            identity = identity_id,
            similarity,
            is_match,
            confidence = ?confidence,
            source = ?best.detection.source,
            "verification completed"
        );

        Ok(VerificationResult {
            is_match,
            similarity,
            confidence,
            quality_score: best.quality.score,
            detection: Some(DetectionSummary {
                source: best.detection.source,
                confidence: best.detection.confidence,
            }),
        })
    }

    /// Analyze an image without touching the store.
    pub async fn analyze(&self, image_bytes: &[u8]) -> Result<Vec<FaceReport>, ServiceError> {
        let analyses = self.run_analysis(image_bytes).await?;
        Ok(analyses.iter().map(FaceReport::of).collect())
    }

    /// Model and store readiness, for monitoring.
    pub async fn health(&self) -> HealthReport {
        match self.pipeline().await {
            Ok(pipeline) => HealthReport {
                status: HealthStatus::Healthy,
                models: pipeline.availability(),
                pipeline_ready: true,
                error: None,
            },
            Err(err) => {
                tracing::error!(error = %err, "pipeline unavailable");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    models: ModelAvailability {
                        detector: false,
                        demographics: false,
                        embedder: false,
                    },
                    pipeline_ready: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<EnrollmentSummary>, ServiceError> {
        Ok(self.store.list().await?)
    }

    /// Remove an enrollment. Returns whether one existed.
    pub async fn remove(&self, identity_id: &str) -> Result<bool, ServiceError> {
        Ok(self.store.remove(identity_id).await?)
    }
}
