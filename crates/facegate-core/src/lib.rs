//! facegate-core — Face analysis pipeline.
//!
//! Detection, alignment, demographic estimation, identity embedding,
//! quality assessment, and verification, with the model inference running
//! via ONNX Runtime for CPU inference. Every model stage except embedding
//! degrades to a heuristic fallback instead of failing.

pub mod alignment;
pub mod demographics;
pub mod detector;
pub mod embedder;
pub mod gray;
pub mod pipeline;
pub mod quality;
pub mod types;
pub mod verify;

pub use pipeline::{ModelAvailability, ModelKind, Pipeline, PipelineConfig, PipelineError};
pub use quality::QualityReport;
pub use types::{
    BoundingBox, DetectionSource, Embedding, FaceAnalysis, FaceDetection, Gender, Landmarks,
};
pub use verify::{ConfidenceTier, DetectionSummary, VerificationResult};
