//! Age and gender estimation with confidence arbitration.
//!
//! Two independent estimators feed a single arbitration policy: a pixel
//! statistics heuristic that is always available, and an optional trained
//! genderage model. [`arbitrate`] is a pure function over their (value,
//! confidence) outputs, so the resolution behavior is testable without any
//! model on disk.

use crate::gray::{self, Region};
use crate::types::Gender;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const GENDERAGE_INPUT_SIZE: u32 = 96;
const GENDERAGE_MEAN: f32 = 127.5;
const GENDERAGE_STD: f32 = 128.0;
/// The model emits age as a fraction of a century.
const AGE_OUTPUT_SCALE: f32 = 100.0;

/// Heuristic results at or above this confidence are accepted without
/// consulting the model.
pub const HEURISTIC_ACCEPT_THRESHOLD: f32 = 0.7;
const AGREEMENT_BOOST: f32 = 0.15;
const AGREEMENT_CONFIDENCE_CAP: f32 = 0.95;
const DISAGREEMENT_MARGIN: f32 = 0.1;
const MODEL_TIEBREAK_THRESHOLD: f32 = 0.6;
/// Downstream consumers never see a confidence below this.
pub const CONFIDENCE_FLOOR: f32 = 0.4;

// Pixel heuristic: region geometry as fractions of the aligned crop,
// placed from the canonical landmark positions alignment targets.
const EYE_REGION: (f32, f32, f32, f32) = (0.15, 0.36, 0.85, 0.56);
const FOREHEAD_REGION: (f32, f32, f32, f32) = (0.25, 0.08, 0.75, 0.28);
const JAW_REGION: (f32, f32, f32, f32) = (0.25, 0.80, 0.75, 0.97);
const LEFT_CHEEK_REGION: (f32, f32, f32, f32) = (0.12, 0.55, 0.38, 0.75);
const RIGHT_CHEEK_REGION: (f32, f32, f32, f32) = (0.62, 0.55, 0.88, 0.75);

const JAW_EDGE_NORM: f32 = 80.0;
const PERIORBITAL_EDGE_NORM: f32 = 80.0;
const TEXTURE_VARIANCE_NORM: f32 = 1800.0;

const JAW_WEIGHT: f32 = 0.4;
const ASPECT_WEIGHT: f32 = 0.3;
const TEXTURE_WEIGHT: f32 = 0.3;
/// Box aspect (width/height) mapped onto [0, 1] masculinity over this range.
const ASPECT_LOW: f32 = 0.70;
const ASPECT_SPAN: f32 = 0.30;
const HEURISTIC_CONFIDENCE_CAP: f32 = 0.9;

const AGE_BASE: f32 = 18.0;
const AGE_TEXTURE_SPAN: f32 = 40.0;
const AGE_PERIORBITAL_SPAN: f32 = 14.0;
/// Plausible reporting range for the resolved age.
pub const AGE_MIN: u8 = 10;
pub const AGE_MAX: u8 = 90;

#[derive(Error, Debug)]
pub enum DemographicsError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One estimator's opinion: a (value, confidence) pair for arbitration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemographicEstimate {
    pub age: f32,
    pub gender: Gender,
    pub confidence: f32,
}

impl DemographicEstimate {
    /// Age as reported downstream, clamped to a plausible human range.
    pub fn resolved_age(&self) -> u8 {
        self.age.round().clamp(AGE_MIN as f32, AGE_MAX as f32) as u8
    }
}

/// Resolve two estimates into one. Pure and deterministic.
///
/// Policy, in order: a confident heuristic wins outright; gender agreement
/// averages the ages and boosts confidence; a clear confidence margin picks
/// the stronger estimator; otherwise a fixed tie-break prefers the model
/// only when it is itself reasonably confident. Every exit applies the
/// confidence floor.
pub fn arbitrate(
    heuristic: DemographicEstimate,
    model: Option<DemographicEstimate>,
) -> DemographicEstimate {
    let finish = |mut est: DemographicEstimate| {
        est.confidence = est.confidence.max(CONFIDENCE_FLOOR);
        est
    };

    if heuristic.confidence >= HEURISTIC_ACCEPT_THRESHOLD {
        return finish(heuristic);
    }

    let model = match model {
        Some(model) => model,
        None => return finish(heuristic),
    };

    if model.gender == heuristic.gender {
        let combined = heuristic
            .confidence
            .max(model.confidence)
            .min(AGREEMENT_CONFIDENCE_CAP - AGREEMENT_BOOST)
            + AGREEMENT_BOOST;
        return finish(DemographicEstimate {
            age: (heuristic.age + model.age) / 2.0,
            gender: model.gender,
            confidence: combined.min(AGREEMENT_CONFIDENCE_CAP),
        });
    }

    if model.confidence - heuristic.confidence > DISAGREEMENT_MARGIN {
        return finish(model);
    }
    if heuristic.confidence - model.confidence > DISAGREEMENT_MARGIN {
        return finish(heuristic);
    }

    if model.confidence >= MODEL_TIEBREAK_THRESHOLD {
        finish(model)
    } else {
        finish(heuristic)
    }
}

/// Estimate demographics from pixel statistics of the aligned crop.
///
/// Gender accumulates three signals: jawline edge sharpness, the detection
/// box aspect ratio, and cheek texture variance, each mapped to a [0, 1]
/// masculinity score. Age grows with skin texture complexity and
/// periorbital edge density. Never fails; confidence reflects how far the
/// signals land from ambiguous.
pub fn analyze_pixels(aligned: &RgbImage, box_aspect: f32) -> DemographicEstimate {
    let gray = imageops::grayscale(aligned);
    let (width, height) = gray.dimensions();

    let region = |frac: (f32, f32, f32, f32)| {
        Region::of_fractions(width, height, frac.0, frac.1, frac.2, frac.3)
    };

    let jaw_edges = gray::region_gradient_mean(&gray, region(JAW_REGION));
    let eye_edges = gray::region_gradient_mean(&gray, region(EYE_REGION));
    let cheek_variance = (gray::region_variance(&gray, region(LEFT_CHEEK_REGION))
        + gray::region_variance(&gray, region(RIGHT_CHEEK_REGION)))
        / 2.0;
    let forehead_variance = gray::region_variance(&gray, region(FOREHEAD_REGION));

    let jaw_signal = (jaw_edges / JAW_EDGE_NORM).clamp(0.0, 1.0);
    let aspect_signal = ((box_aspect - ASPECT_LOW) / ASPECT_SPAN).clamp(0.0, 1.0);
    let texture_signal = (cheek_variance / TEXTURE_VARIANCE_NORM).clamp(0.0, 1.0);

    let male_score =
        JAW_WEIGHT * jaw_signal + ASPECT_WEIGHT * aspect_signal + TEXTURE_WEIGHT * texture_signal;
    let female_score = 1.0 - male_score;

    let gender = if male_score > female_score { Gender::Male } else { Gender::Female };
    let confidence =
        (0.5 + (male_score - female_score).abs() * 0.5).min(HEURISTIC_CONFIDENCE_CAP);

    let skin_texture = ((cheek_variance + forehead_variance) / 2.0 / TEXTURE_VARIANCE_NORM)
        .clamp(0.0, 1.0);
    let periorbital = (eye_edges / PERIORBITAL_EDGE_NORM).clamp(0.0, 1.0);
    let age = AGE_BASE + skin_texture * AGE_TEXTURE_SPAN + periorbital * AGE_PERIORBITAL_SPAN;

    DemographicEstimate { age, gender, confidence }
}

/// Optional genderage model session.
#[derive(Debug)]
pub struct DemographicModel {
    session: Mutex<Session>,
    output_count: usize,
}

impl DemographicModel {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DemographicsError> {
        if !model_path.exists() {
            return Err(DemographicsError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;
        let output_count = session.outputs().len();

        tracing::info!(
            path = %model_path.display(),
            outputs = output_count,
            "loaded demographic model"
        );

        Ok(Self { session: Mutex::new(session), output_count })
    }

    /// Run the model on an aligned crop. Any failure degrades to `None`;
    /// the arbitration then runs on the heuristic alone.
    pub fn estimate(&self, aligned: &RgbImage) -> Option<DemographicEstimate> {
        let input = preprocess(aligned);

        let mut session = match self.session.lock() {
            Ok(session) => session,
            Err(_) => {
                tracing::warn!("demographic session lock poisoned");
                return None;
            }
        };

        let tensor = match TensorRef::from_array_view(input.view()) {
            Ok(tensor) => tensor,
            Err(err) => {
                tracing::warn!(error = %err, "demographic input rejected");
                return None;
            }
        };
        let outputs = match session.run(ort::inputs![tensor]) {
            Ok(outputs) => outputs,
            Err(err) => {
                tracing::warn!(error = %err, "demographic inference failed");
                return None;
            }
        };

        let mut tensors = Vec::with_capacity(self.output_count);
        for idx in 0..self.output_count {
            match outputs[idx].try_extract_tensor::<f32>() {
                Ok((_, data)) => tensors.push(data.to_vec()),
                Err(_) => tensors.push(Vec::new()),
            }
        }

        let estimate = parse_outputs(&tensors);
        if estimate.is_none() {
            tracing::warn!(
                shapes = ?tensors.iter().map(Vec::len).collect::<Vec<_>>(),
                "unrecognized genderage output shape"
            );
        }
        estimate
    }
}

fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(
        aligned,
        GENDERAGE_INPUT_SIZE,
        GENDERAGE_INPUT_SIZE,
        FilterType::Triangle,
    );

    let size = GENDERAGE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel[c] as f32 - GENDERAGE_MEAN) / GENDERAGE_STD;
        }
    }
    tensor
}

/// Parse genderage outputs.
///
/// Two known export shapes: a single `[female, male, age_fraction]` tensor,
/// or gender logits and the age fraction split across two outputs. Gender
/// confidence is the softmax of the two logits.
fn parse_outputs(tensors: &[Vec<f32>]) -> Option<DemographicEstimate> {
    let (female, male, age_fraction) = if tensors.first().map_or(0, Vec::len) >= 3 {
        let t = &tensors[0];
        (t[0], t[1], t[2])
    } else if tensors.len() >= 2 && tensors[0].len() >= 2 && !tensors[1].is_empty() {
        (tensors[0][0], tensors[0][1], tensors[1][0])
    } else {
        return None;
    };

    if !(female.is_finite() && male.is_finite() && age_fraction.is_finite()) {
        return None;
    }

    let (gender, confidence) = if male > female {
        (Gender::Male, softmax2(male, female))
    } else {
        (Gender::Female, softmax2(female, male))
    };
    let age = (age_fraction * AGE_OUTPUT_SCALE).clamp(1.0, AGE_OUTPUT_SCALE);

    Some(DemographicEstimate { age, gender, confidence })
}

/// Probability of the first logit under a two-way softmax.
fn softmax2(selected: f32, other: f32) -> f32 {
    let max = selected.max(other);
    let e_sel = (selected - max).exp();
    let e_oth = (other - max).exp();
    e_sel / (e_sel + e_oth)
}
