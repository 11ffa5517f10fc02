//! Face detection via ONNX Runtime.
//!
//! Runs an SCRFD-style detector that emits one (scores, boxes, landmarks)
//! tensor triple per detection scale. The triple grouping is bound at load
//! time by inspecting output names; at inference time the decoder handles
//! both normalized and model-pixel-space coordinates per box. Two fallback
//! tiers keep detection available: an exhaustive permutation search over the
//! output tensors, then a heuristic center-region detection.

use crate::types::{BoundingBox, DetectionSource, FaceDetection, Landmarks};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const DETECTOR_INPUT_SIZE: u32 = 640;
const DETECTOR_MEAN: f32 = 127.5;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_STRIDES: [usize; 3] = [8, 16, 32];
const NMS_IOU_THRESHOLD: f32 = 0.4;
/// Boxes with either side below this fraction of the shorter image
/// dimension are noise.
const MIN_BOX_FRACTION: f32 = 0.05;

/// Default confidence threshold; calibratable through the pipeline config.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;

// Heuristic fallback geometry: a face assumed to fill 60% x 70% of the
// image, biased toward the upper rows.
const FALLBACK_WIDTH_FRACTION: f32 = 0.6;
const FALLBACK_HEIGHT_FRACTION: f32 = 0.7;
const FALLBACK_TOP_FRACTION: f32 = 0.1;
pub const FALLBACK_CONFIDENCE: f32 = 0.8;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model exposes {0} output tensors, need at least 3 for one (scores, boxes, landmarks) triple")]
    UnexpectedOutputs(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one scale: (scores, boxes, landmarks).
type ScaleTriple = (usize, usize, usize);

/// Roles of the model's output tensors, bound once at load time.
///
/// Resolved from output names ("score_8", "bbox_16", "kps_32", ...) with a
/// positional fallback for models exporting generic numeric names. When
/// neither applies, per-call permutation decoding is the only strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
    scales: [ScaleTriple; 3],
}

impl OutputLayout {
    fn resolve(names: &[String]) -> Option<OutputLayout> {
        let find = |prefix: &str, stride: usize| -> Option<usize> {
            let target = format!("{prefix}_{stride}");
            names.iter().position(|n| n == &target)
        };

        let named = DETECTOR_STRIDES.iter().all(|&stride| {
            find("score", stride).is_some()
                && find("bbox", stride).is_some()
                && find("kps", stride).is_some()
        });

        if named {
            tracing::debug!("detector: name-based output layout");
            Some(OutputLayout {
                scales: std::array::from_fn(|i| {
                    let stride = DETECTOR_STRIDES[i];
                    (
                        find("score", stride).unwrap(),
                        find("bbox", stride).unwrap(),
                        find("kps", stride).unwrap(),
                    )
                }),
            })
        } else if names.len() >= 9 {
            // Positional: [0-2]=scores, [3-5]=boxes, [6-8]=landmarks per stride
            tracing::debug!(?names, "detector: positional output layout");
            Some(OutputLayout { scales: [(0, 3, 6), (1, 4, 7), (2, 5, 8)] })
        } else {
            None
        }
    }
}

/// SCRFD-style face detector with layered fallbacks.
#[derive(Debug)]
pub struct FaceDetector {
    session: Mutex<Session>,
    layout: Option<OutputLayout>,
    output_count: usize,
    confidence_threshold: f32,
}

impl FaceDetector {
    /// Load the detection model. Fails when the file is missing or exposes
    /// fewer output tensors than one (scores, boxes, landmarks) triple.
    pub fn load(
        model_path: &Path,
        confidence_threshold: f32,
        intra_threads: usize,
    ) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded detector model"
        );

        if output_names.len() < 3 {
            return Err(DetectorError::UnexpectedOutputs(output_names.len()));
        }

        let layout = OutputLayout::resolve(&output_names);
        match &layout {
            Some(layout) => tracing::debug!(?layout, "detector output layout bound"),
            None => tracing::warn!(
                count = output_names.len(),
                "output layout unrecognized, relying on permutation decoding"
            ),
        }

        Ok(Self {
            session: Mutex::new(session),
            layout,
            output_count: output_names.len(),
            confidence_threshold,
        })
    }

    /// Detect faces, highest confidence first.
    ///
    /// Never fails and never returns an empty set: when the model yields no
    /// valid detections under any parsing strategy, the result is a single
    /// heuristic detection tagged [`DetectionSource::Heuristic`].
    pub fn detect(&self, image: &RgbImage) -> Vec<FaceDetection> {
        let (width, height) = image.dimensions();
        let (input, letterbox) = preprocess(image, DETECTOR_INPUT_SIZE);

        let tensors = match self.run_raw(input) {
            Ok(tensors) => tensors,
            Err(err) => {
                tracing::warn!(error = %err, "detector inference failed, using heuristic region");
                return vec![heuristic_detection(width, height)];
            }
        };

        let mut detections = match &self.layout {
            Some(layout) => decode_scale_groups(
                &tensors,
                layout,
                width,
                height,
                &letterbox,
                self.confidence_threshold,
            ),
            None => Vec::new(),
        };

        if detections.is_empty() {
            detections = decode_any_permutation(
                &tensors,
                width,
                height,
                &letterbox,
                self.confidence_threshold,
            );
        }

        if detections.is_empty() {
            tracing::debug!(width, height, "no model detections, using heuristic region");
            return vec![heuristic_detection(width, height)];
        }

        let mut kept = nms(detections, NMS_IOU_THRESHOLD);
        kept.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        kept
    }

    /// Run the session and pull every output tensor out as an owned vector.
    /// Non-float outputs become empty vectors and play no role in decoding.
    fn run_raw(&self, input: Array4<f32>) -> Result<Vec<Vec<f32>>, DetectorError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut tensors = Vec::with_capacity(self.output_count);
        for idx in 0..self.output_count {
            match outputs[idx].try_extract_tensor::<f32>() {
                Ok((_, data)) => tensors.push(data.to_vec()),
                Err(_) => tensors.push(Vec::new()),
            }
        }
        Ok(tensors)
    }
}

/// Letterbox an image into a square NCHW float tensor.
///
/// The image is resized preserving aspect ratio and centered; the tensor is
/// zero-filled, which equals mid-gray after (p - 127.5) / 128 normalization,
/// so the padding carries no signal.
fn preprocess(image: &RgbImage, input_size: u32) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = image.dimensions();
    let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_size);
    let pad_x = (input_size - new_w) / 2;
    let pad_y = (input_size - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = input_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..new_h {
        for x in 0..new_w {
            let pixel = resized.get_pixel(x, y);
            let ty = (y + pad_y) as usize;
            let tx = (x + pad_x) as usize;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
            }
        }
    }

    (
        tensor,
        LetterboxInfo { scale, pad_x: pad_x as f32, pad_y: pad_y as f32 },
    )
}

/// Decode all scale groups named by the layout and pool the detections.
fn decode_scale_groups(
    tensors: &[Vec<f32>],
    layout: &OutputLayout,
    width: u32,
    height: u32,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceDetection> {
    let mut all = Vec::new();
    for &(score_idx, bbox_idx, kps_idx) in &layout.scales {
        if score_idx >= tensors.len() || bbox_idx >= tensors.len() || kps_idx >= tensors.len() {
            continue;
        }
        all.extend(decode_triple(
            &tensors[score_idx],
            &tensors[bbox_idx],
            &tensors[kps_idx],
            width,
            height,
            letterbox,
            threshold,
        ));
    }
    all
}

/// Try every ordered triple of output tensors as (scores, boxes, landmarks)
/// and accept the first that yields at least one valid detection.
fn decode_any_permutation(
    tensors: &[Vec<f32>],
    width: u32,
    height: u32,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceDetection> {
    let n = tensors.len();
    for s in 0..n {
        for b in 0..n {
            if b == s {
                continue;
            }
            for k in 0..n {
                if k == s || k == b {
                    continue;
                }
                let dets =
                    decode_triple(&tensors[s], &tensors[b], &tensors[k], width, height, letterbox, threshold);
                if !dets.is_empty() {
                    tracing::debug!(
                        scores = s,
                        boxes = b,
                        landmarks = k,
                        found = dets.len(),
                        "permutation fallback matched an output triple"
                    );
                    return dets;
                }
            }
        }
    }
    Vec::new()
}

/// Decode one (scores, boxes, landmarks) triple into validated detections.
///
/// Box coordinates may be normalized to [0, 1] or in model input pixel
/// space; the regime is detected per box (all four values <= 1.0 means
/// normalized) and mapped to original image pixels accordingly. Landmarks
/// follow their box's regime.
fn decode_triple(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    width: u32,
    height: u32,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceDetection> {
    let count = scores.len().min(boxes.len() / 4).min(kps.len() / 10);
    let w = width as f32;
    let h = height as f32;

    let mut detections = Vec::new();
    for i in 0..count {
        let score = scores[i];
        // NaN-safe: only well-formed scores at or above the threshold pass
        if !(score >= threshold) {
            continue;
        }

        let raw = &boxes[i * 4..i * 4 + 4];
        let normalized = raw.iter().all(|&v| v <= 1.0);

        let map_x = |v: f32| {
            if normalized {
                v * w
            } else {
                (v - letterbox.pad_x) / letterbox.scale
            }
        };
        let map_y = |v: f32| {
            if normalized {
                v * h
            } else {
                (v - letterbox.pad_y) / letterbox.scale
            }
        };

        let bbox = BoundingBox {
            x1: map_x(raw[0]),
            y1: map_y(raw[1]),
            x2: map_x(raw[2]),
            y2: map_y(raw[3]),
        };
        if !valid_box(&bbox, width, height) {
            continue;
        }

        let mut landmarks: Landmarks = [(0.0, 0.0); 5];
        for (j, point) in landmarks.iter_mut().enumerate() {
            *point = (map_x(kps[i * 10 + j * 2]), map_y(kps[i * 10 + j * 2 + 1]));
        }

        detections.push(FaceDetection {
            bbox,
            landmarks,
            confidence: score,
            source: DetectionSource::Model,
        });
    }
    detections
}

/// Accept only well-formed boxes: positive area, no side below 5% of the
/// shorter image dimension, fully inside the image. NaN fails every test.
fn valid_box(bbox: &BoundingBox, width: u32, height: u32) -> bool {
    if !(bbox.x2 > bbox.x1 && bbox.y2 > bbox.y1) {
        return false;
    }
    let min_side = (width.min(height) as f32) * MIN_BOX_FRACTION;
    if !(bbox.width() >= min_side && bbox.height() >= min_side) {
        return false;
    }
    bbox.within(width, height)
}

/// Synthesize a detection when the model produced nothing usable: a face
/// assumed to occupy 60% x 70% of the image, shifted toward the upper rows,
/// with landmark positions laid out from the box geometry.
pub fn heuristic_detection(width: u32, height: u32) -> FaceDetection {
    let w = width as f32;
    let h = height as f32;

    let x1 = w * (1.0 - FALLBACK_WIDTH_FRACTION) / 2.0;
    let x2 = x1 + w * FALLBACK_WIDTH_FRACTION;
    let y1 = h * FALLBACK_TOP_FRACTION;
    let y2 = y1 + h * FALLBACK_HEIGHT_FRACTION;

    let bw = x2 - x1;
    let bh = y2 - y1;
    let landmarks: Landmarks = [
        (x1 + bw * 0.30, y1 + bh * 0.35),
        (x1 + bw * 0.70, y1 + bh * 0.35),
        (x1 + bw * 0.50, y1 + bh * 0.55),
        (x1 + bw * 0.35, y1 + bh * 0.75),
        (x1 + bw * 0.65, y1 + bh * 0.75),
    ];

    FaceDetection {
        bbox: BoundingBox { x1, y1, x2, y2 },
        landmarks,
        confidence: FALLBACK_CONFIDENCE,
        source: DetectionSource::Heuristic,
    }
}

/// Non-Maximum Suppression: drop detections overlapping a higher-confidence one.
fn nms(mut detections: Vec<FaceDetection>, iou_threshold: f32) -> Vec<FaceDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width() * a.height() + b.width() * b.height() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_detection(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox { x1, y1, x2, y2 },
            landmarks: [(0.0, 0.0); 5],
            confidence: conf,
            source: DetectionSource::Model,
        }
    }

    fn identity_letterbox() -> LetterboxInfo {
        LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 }
    }

    /// Build (scores, boxes, kps) arrays holding a single candidate.
    fn single_candidate(score: f32, bbox: [f32; 4]) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        (vec![score], bbox.to_vec(), vec![0.5; 10])
    }

    #[test]
    fn test_iou_identical() {
        let a = make_detection(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a.bbox, &a.bbox) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_detection(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_detection(20.0, 20.0, 30.0, 30.0, 1.0);
        assert!(iou(&a.bbox, &b.bbox).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_detection(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_detection(5.0, 0.0, 15.0, 10.0, 1.0);
        // Overlap 5x10 = 50, union 100 + 100 - 50 = 150
        assert!((iou(&a.bbox, &b.bbox) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_detection(0.0, 0.0, 100.0, 100.0, 0.9),
            make_detection(5.0, 5.0, 105.0, 105.0, 0.8),
            make_detection(200.0, 200.0, 250.0, 250.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let img = RgbImage::from_pixel(320, 240, image::Rgb([100, 100, 100]));
        let (_, letterbox) = preprocess(&img, DETECTOR_INPUT_SIZE);

        let orig_x = 100.0f32;
        let orig_y = 50.0f32;
        let boxed_x = orig_x * letterbox.scale + letterbox.pad_x;
        let boxed_y = orig_y * letterbox.scale + letterbox.pad_y;

        let recovered_x = (boxed_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (boxed_y - letterbox.pad_y) / letterbox.scale;
        assert!((recovered_x - orig_x).abs() < 0.1);
        assert!((recovered_y - orig_y).abs() < 0.1);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        // 320x240 scales to 640x480 inside a 640x640 tensor, padded
        // top and bottom by 80 rows of zeros.
        let img = RgbImage::from_pixel(320, 240, image::Rgb([255, 255, 255]));
        let (tensor, letterbox) = preprocess(&img, DETECTOR_INPUT_SIZE);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 80.0);
        // Padding rows stay at the zero fill
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 0, 639, 320]], 0.0);
        // Image rows carry normalized white
        let expected = (255.0 - DETECTOR_MEAN) / DETECTOR_STD;
        assert!((tensor[[0, 0, 320, 320]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_decode_normalized_regime() {
        // All four coordinates <= 1.0: scaled by original image dimensions
        let (scores, boxes, kps) = single_candidate(0.9, [0.25, 0.25, 0.75, 0.75]);
        let dets = decode_triple(&scores, &boxes, &kps, 400, 200, &identity_letterbox(), 0.3);
        assert_eq!(dets.len(), 1);
        let bbox = dets[0].bbox;
        assert!((bbox.x1 - 100.0).abs() < 1e-3);
        assert!((bbox.y1 - 50.0).abs() < 1e-3);
        assert!((bbox.x2 - 300.0).abs() < 1e-3);
        assert!((bbox.y2 - 150.0).abs() < 1e-3);
        assert_eq!(dets[0].source, DetectionSource::Model);
    }

    #[test]
    fn test_decode_pixel_regime_unletterboxes() {
        // Coordinates > 1.0: treated as model input pixels and mapped back
        // through the letterbox (scale 2.0, pad_y 80).
        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let (scores, boxes, kps) = single_candidate(0.9, [100.0, 180.0, 500.0, 560.0]);
        let dets = decode_triple(&scores, &boxes, &kps, 320, 240, &letterbox, 0.3);
        assert_eq!(dets.len(), 1);
        let bbox = dets[0].bbox;
        assert!((bbox.x1 - 50.0).abs() < 1e-3);
        assert!((bbox.y1 - 50.0).abs() < 1e-3);
        assert!((bbox.x2 - 250.0).abs() < 1e-3);
        assert!((bbox.y2 - 240.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_below_threshold() {
        let (scores, boxes, kps) = single_candidate(0.2, [0.25, 0.25, 0.75, 0.75]);
        assert!(decode_triple(&scores, &boxes, &kps, 400, 200, &identity_letterbox(), 0.3).is_empty());
    }

    #[test]
    fn test_decode_rejects_nan_score() {
        let (scores, boxes, kps) = single_candidate(f32::NAN, [0.25, 0.25, 0.75, 0.75]);
        assert!(decode_triple(&scores, &boxes, &kps, 400, 200, &identity_letterbox(), 0.3).is_empty());
    }

    #[test]
    fn test_decode_rejects_tiny_box() {
        // 2% of the shorter dimension: below the 5% noise floor
        let (scores, boxes, kps) = single_candidate(0.9, [0.5, 0.5, 0.52, 0.52]);
        assert!(decode_triple(&scores, &boxes, &kps, 400, 400, &identity_letterbox(), 0.3).is_empty());
    }

    #[test]
    fn test_decode_rejects_out_of_bounds_box() {
        let letterbox = identity_letterbox();
        // Pixel-space box extending past the right edge
        let (scores, boxes, kps) = single_candidate(0.9, [300.0, 100.0, 450.0, 300.0]);
        assert!(decode_triple(&scores, &boxes, &kps, 400, 400, &letterbox, 0.3).is_empty());
    }

    #[test]
    fn test_decode_rejects_inverted_box() {
        let (scores, boxes, kps) = single_candidate(0.9, [0.75, 0.75, 0.25, 0.25]);
        assert!(decode_triple(&scores, &boxes, &kps, 400, 400, &identity_letterbox(), 0.3).is_empty());
    }

    #[test]
    fn test_box_validity_invariant() {
        let (scores, boxes, kps) = single_candidate(0.9, [0.1, 0.1, 0.9, 0.9]);
        let dets = decode_triple(&scores, &boxes, &kps, 640, 480, &identity_letterbox(), 0.3);
        for det in &dets {
            assert!(det.bbox.x1 < det.bbox.x2);
            assert!(det.bbox.y1 < det.bbox.y2);
            assert!(det.bbox.within(640, 480));
        }
    }

    #[test]
    fn test_permutation_fallback_finds_shuffled_triple() {
        // Valid candidate data placed at indices (kps=0, scores=1, boxes=2);
        // grouped parsing assumes (0, 1, 2) order and fails, permutation
        // search must find (scores=1, boxes=2, kps=0).
        let (scores, boxes, kps) = single_candidate(0.9, [0.25, 0.25, 0.75, 0.75]);
        let tensors = vec![kps, scores, boxes];
        let dets = decode_any_permutation(&tensors, 400, 400, &identity_letterbox(), 0.3);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_permutation_fallback_empty_on_garbage() {
        let tensors = vec![vec![0.0; 4], vec![0.0; 4], vec![0.0; 4]];
        assert!(decode_any_permutation(&tensors, 400, 400, &identity_letterbox(), 0.3).is_empty());
    }

    #[test]
    fn test_heuristic_detection_geometry() {
        let det = heuristic_detection(1000, 1000);
        assert_eq!(det.source, DetectionSource::Heuristic);
        assert!((det.confidence - FALLBACK_CONFIDENCE).abs() < 1e-6);
        // 60% width centered, 70% height starting at 10%
        assert!((det.bbox.x1 - 200.0).abs() < 1e-3);
        assert!((det.bbox.x2 - 800.0).abs() < 1e-3);
        assert!((det.bbox.y1 - 100.0).abs() < 1e-3);
        assert!((det.bbox.y2 - 800.0).abs() < 1e-3);
        // Box center sits above the image midline
        let center_y = (det.bbox.y1 + det.bbox.y2) / 2.0;
        assert!(center_y < 500.0);
    }

    #[test]
    fn test_heuristic_landmarks_inside_box() {
        let det = heuristic_detection(640, 480);
        for (x, y) in det.landmarks {
            assert!(x > det.bbox.x1 && x < det.bbox.x2);
            assert!(y > det.bbox.y1 && y < det.bbox.y2);
        }
        // Eyes above nose, nose above mouth
        assert!(det.landmarks[0].1 < det.landmarks[2].1);
        assert!(det.landmarks[2].1 < det.landmarks[3].1);
    }

    #[test]
    fn test_heuristic_box_valid_for_any_size() {
        for (w, h) in [(64, 64), (1920, 1080), (480, 640), (100, 1000)] {
            let det = heuristic_detection(w, h);
            assert!(det.bbox.x1 < det.bbox.x2);
            assert!(det.bbox.y1 < det.bbox.y2);
            assert!(det.bbox.within(w, h));
        }
    }

    #[test]
    fn test_output_layout_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8", "bbox_16", "bbox_32",
            "kps_8", "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let layout = OutputLayout::resolve(&names).unwrap();
        assert_eq!(layout.scales[0], (0, 3, 6));
        assert_eq!(layout.scales[1], (1, 4, 7));
        assert_eq!(layout.scales[2], (2, 5, 8));
    }

    #[test]
    fn test_output_layout_shuffled_names() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let layout = OutputLayout::resolve(&names).unwrap();
        assert_eq!(layout.scales[0], (2, 0, 1));
        assert_eq!(layout.scales[1], (5, 3, 4));
        assert_eq!(layout.scales[2], (8, 6, 7));
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        let layout = OutputLayout::resolve(&names).unwrap();
        assert_eq!(layout.scales, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_output_layout_unresolvable() {
        let names: Vec<String> = (0..6).map(|i: usize| i.to_string()).collect();
        assert!(OutputLayout::resolve(&names).is_none());
    }
}
