//! Identity embedding extraction.
//!
//! Runs an ArcFace-style recognition model over the aligned crop and
//! L2-normalizes the output. Unlike detection and demographics there is no
//! heuristic fallback here: identity features cannot be approximated, so
//! every failure propagates.

use crate::alignment::ALIGNED_SIZE;
use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// Symmetric normalization to [-1, 1], the ArcFace input contract.
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;
/// Output width of the recognition models this pipeline ships with.
pub const EMBEDDING_DIM: usize = 512;
/// Raw outputs with a norm at or below this are degenerate and cannot be
/// normalized meaningfully.
const MIN_RAW_NORM: f32 = 1e-6;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model produced an empty or degenerate embedding")]
    DegenerateOutput,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-style embedding session.
#[derive(Debug)]
pub struct Embedder {
    session: Mutex<Session>,
    model_tag: String,
}

impl Embedder {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let model_tag = model_tag(model_path);
        tracing::info!(path = %model_path.display(), tag = %model_tag, "loaded embedding model");

        Ok(Self { session: Mutex::new(session), model_tag })
    }

    /// Extract a unit-norm embedding from an aligned face crop.
    pub fn embed(&self, aligned: &RgbImage) -> Result<Embedding, EmbedderError> {
        let input = preprocess(aligned);

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbedderError::InferenceFailed("session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|err| EmbedderError::InferenceFailed(err.to_string()))?;

        if data.len() != EMBEDDING_DIM {
            tracing::debug!(dim = data.len(), "embedding width differs from the usual export");
        }

        let values = normalize(data.to_vec())?;
        Ok(Embedding { values, model_version: Some(self.model_tag.clone()) })
    }
}

/// L2-normalize a raw output vector. Errors on empty, zero-norm, or
/// non-finite input instead of emitting a garbage embedding.
fn normalize(raw: Vec<f32>) -> Result<Vec<f32>, EmbedderError> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    // NaN norms fail this comparison too
    if !(norm > MIN_RAW_NORM) {
        return Err(EmbedderError::DegenerateOutput);
    }
    Ok(raw.into_iter().map(|v| v / norm).collect())
}

/// Tensor layout for the recognition model: NCHW, symmetric range.
/// Off-size inputs are resized first; alignment already produces the
/// canonical size.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let resized;
    let source = if aligned.dimensions() == (ALIGNED_SIZE, ALIGNED_SIZE) {
        aligned
    } else {
        resized = imageops::resize(aligned, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle);
        &resized
    };

    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in source.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
        }
    }
    tensor
}

/// Model identifier persisted alongside embeddings: the file stem.
fn model_tag(model_path: &Path) -> String {
    model_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_normalize_produces_unit_norm() {
        let values = normalize(vec![3.0, 4.0]).unwrap();
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((values[0] - 0.6).abs() < 1e-6);
        assert!((values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_high_dimensional() {
        let values = normalize(vec![0.01; EMBEDDING_DIM]).unwrap();
        let embedding = Embedding { values, model_version: None };
        assert!(embedding.is_unit_norm(1e-5));
    }

    #[test]
    fn test_normalize_rejects_zero_vector() {
        assert!(matches!(
            normalize(vec![0.0; 8]),
            Err(EmbedderError::DegenerateOutput)
        ));
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(matches!(normalize(vec![]), Err(EmbedderError::DegenerateOutput)));
    }

    #[test]
    fn test_normalize_rejects_nan() {
        assert!(matches!(
            normalize(vec![1.0, f32::NAN, 2.0]),
            Err(EmbedderError::DegenerateOutput)
        ));
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let img = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, image::Rgb([255, 0, 128]));
        let tensor = preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
        assert!(tensor[[0, 2, 0, 0]].abs() < 0.01);
    }

    #[test]
    fn test_preprocess_resizes_off_size_input() {
        let img = RgbImage::from_pixel(64, 48, image::Rgb([10, 10, 10]));
        let tensor = preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_model_tag_from_stem() {
        assert_eq!(model_tag(&PathBuf::from("/models/w600k_r50.onnx")), "w600k_r50");
        assert_eq!(model_tag(&PathBuf::from("arcface.onnx")), "arcface");
    }

    #[test]
    fn test_load_missing_model() {
        let err = Embedder::load(&PathBuf::from("/nonexistent/model.onnx"), 1).unwrap_err();
        assert!(matches!(err, EmbedderError::ModelNotFound(_)));
    }
}
