//! Face alignment by padded crop.
//!
//! Crops a padded region around the detected box, clamps it to the image,
//! and resizes to the embedder's canonical 112x112 input. The resize fills
//! the square (stretches), it does not preserve aspect. Alignment never
//! fails: a degenerate crop falls back to a centered region, and a
//! degenerate image falls back to a whole-image resize.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Canonical aligned crop size expected by the embedder and the
/// demographic model.
pub const ALIGNED_SIZE: u32 = 112;

const PAD_FRACTION: f32 = 0.2;
const MIN_PAD_PX: f32 = 10.0;
/// Crops smaller than this on either side carry too little detail to embed.
const MIN_CROP_PX: u32 = 32;
const CENTER_FALLBACK_FRACTION: f32 = 0.8;

/// Crop the face region and resize it to [`ALIGNED_SIZE`].
pub fn align_face(image: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    match face_region(image, bbox) {
        Some((x, y, w, h)) => {
            let crop = imageops::crop_imm(image, x, y, w, h).to_image();
            imageops::resize(&crop, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
        }
        None => imageops::resize(image, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle),
    }
}

/// Compute the padded, clamped crop rectangle for a box, in (x, y, w, h) form.
///
/// Returns `None` when no usable region exists and the caller should resize
/// the whole image instead.
fn face_region(image: &RgbImage, bbox: &BoundingBox) -> Option<(u32, u32, u32, u32)> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let pad = (bbox.width().max(bbox.height()) * PAD_FRACTION).max(MIN_PAD_PX);
    let x0 = (bbox.x1 - pad).floor().max(0.0) as u32;
    let y0 = (bbox.y1 - pad).floor().max(0.0) as u32;
    let x1 = ((bbox.x2 + pad).ceil() as u32).min(width);
    let y1 = ((bbox.y2 + pad).ceil() as u32).min(height);

    let w = x1.saturating_sub(x0);
    let h = y1.saturating_sub(y0);
    if w >= MIN_CROP_PX && h >= MIN_CROP_PX {
        return Some((x0, y0, w, h));
    }

    centered_region(width, height)
}

/// Centered square at 80% of the shorter image dimension.
fn centered_region(width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let side = (width.min(height) as f32 * CENTER_FALLBACK_FRACTION) as u32;
    if side == 0 {
        return None;
    }
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    Some((x, y, side, side))
}
