//! Quality scoring of aligned face crops.
//!
//! The composite score weighs exposure, contrast, and edge sharpness; it
//! selects the best face among multiple detections and weights verification
//! similarity, so every term is normalized to [0, 1] before combining.

use crate::gray;
use image::RgbImage;
use serde::{Deserialize, Serialize};

const BRIGHTNESS_WEIGHT: f32 = 0.3;
const CONTRAST_WEIGHT: f32 = 0.4;
const SHARPNESS_WEIGHT: f32 = 0.3;

/// Luma stddev treated as full contrast. Face crops rarely exceed this.
const CONTRAST_NORM: f32 = 64.0;
/// Mean Sobel magnitude treated as fully sharp.
const SHARPNESS_NORM: f32 = 96.0;

/// Per-term quality breakdown. The individual terms are persisted with an
/// enrollment for audit; `score` is the weighted composite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityReport {
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
    pub score: f32,
}

/// Score an aligned face crop. All outputs are in [0, 1] for any input,
/// including all-black and all-white images.
pub fn assess(aligned: &RgbImage) -> QualityReport {
    let luma = image::imageops::grayscale(aligned);

    // Exposure: 1.0 at mid-gray, falling off linearly toward black or white.
    let mean = gray::region_mean(&luma, gray::full(&luma));
    let brightness = (1.0 - (mean / 255.0 - 0.5).abs() * 2.0).clamp(0.0, 1.0);

    let contrast = (gray::stddev(&luma) / CONTRAST_NORM).clamp(0.0, 1.0);
    let sharpness = (gray::gradient_mean(&luma) / SHARPNESS_NORM).clamp(0.0, 1.0);

    let score = (BRIGHTNESS_WEIGHT * brightness
        + CONTRAST_WEIGHT * contrast
        + SHARPNESS_WEIGHT * sharpness)
        .clamp(0.0, 1.0);

    QualityReport { brightness, contrast, sharpness, score }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(112, 112, Rgb([value, value, value]))
    }

    /// 2x2-block checkerboard; block edges give a strong Sobel response
    /// where single-pixel alternation would cancel.
    fn checkerboard() -> RgbImage {
        RgbImage::from_fn(112, 112, |x, y| {
            if (x / 2 + y / 2) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    fn in_unit(v: f32) -> bool {
        (0.0..=1.0).contains(&v)
    }

    #[test]
    fn test_bounds_all_black() {
        let report = assess(&solid(0));
        assert!(in_unit(report.brightness));
        assert!(in_unit(report.contrast));
        assert!(in_unit(report.sharpness));
        assert!(in_unit(report.score));
        // Black: worst exposure, no contrast, no edges
        assert!(report.score < 0.1);
    }

    #[test]
    fn test_bounds_all_white() {
        let report = assess(&solid(255));
        assert!(in_unit(report.score));
        assert!(report.brightness < 0.05);
        assert_eq!(report.contrast, 0.0);
    }

    #[test]
    fn test_mid_gray_brightness_is_full() {
        let report = assess(&solid(128));
        assert!(report.brightness > 0.99);
        // Uniform image has no contrast or edges
        assert!(report.contrast < 1e-6);
        assert!(report.sharpness < 1e-6);
        assert!((report.score - BRIGHTNESS_WEIGHT * report.brightness).abs() < 1e-6);
    }

    #[test]
    fn test_checkerboard_maximizes_contrast_and_sharpness() {
        let report = assess(&checkerboard());
        assert!((report.contrast - 1.0).abs() < 1e-6);
        assert!((report.sharpness - 1.0).abs() < 1e-6);
        assert!(in_unit(report.score));
    }

    #[test]
    fn test_textured_scores_above_flat() {
        let flat = assess(&solid(128));
        let textured = assess(&checkerboard());
        assert!(textured.score > flat.score);
    }

    #[test]
    fn test_weights_sum_to_one() {
        assert!((BRIGHTNESS_WEIGHT + CONTRAST_WEIGHT + SHARPNESS_WEIGHT - 1.0).abs() < 1e-6);
    }
}
