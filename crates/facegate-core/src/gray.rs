//! Grayscale statistics shared by the quality assessor and the demographic
//! heuristic: mean, spread, and Sobel gradient magnitude over whole images
//! or rectangular regions.

use image::GrayImage;

/// Rectangular pixel region, half-open on the right/bottom edge.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Region {
    /// Build a region from fractional coordinates of a `width` x `height` image.
    /// Fractions are clamped so the region always fits the image.
    pub fn of_fractions(width: u32, height: u32, fx0: f32, fy0: f32, fx1: f32, fy1: f32) -> Region {
        let to_px = |f: f32, dim: u32| (f.clamp(0.0, 1.0) * dim as f32).round() as u32;
        let x0 = to_px(fx0, width);
        let y0 = to_px(fy0, height);
        Region {
            x0,
            y0,
            x1: to_px(fx1, width).clamp(x0, width),
            y1: to_px(fy1, height).clamp(y0, height),
        }
    }

    fn pixel_count(&self) -> u64 {
        (self.x1 - self.x0) as u64 * (self.y1 - self.y0) as u64
    }
}

/// Full-image region for a grayscale buffer.
pub fn full(gray: &GrayImage) -> Region {
    Region { x0: 0, y0: 0, x1: gray.width(), y1: gray.height() }
}

/// Mean luma (0.0-255.0) over a region. 0.0 for an empty region.
pub fn region_mean(gray: &GrayImage, region: Region) -> f32 {
    if region.pixel_count() == 0 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for y in region.y0..region.y1 {
        for x in region.x0..region.x1 {
            sum += gray.get_pixel(x, y)[0] as f64;
        }
    }
    (sum / region.pixel_count() as f64) as f32
}

/// Luma variance over a region. 0.0 for an empty region.
pub fn region_variance(gray: &GrayImage, region: Region) -> f32 {
    if region.pixel_count() == 0 {
        return 0.0;
    }
    let mean = region_mean(gray, region) as f64;
    let mut sum = 0.0f64;
    for y in region.y0..region.y1 {
        for x in region.x0..region.x1 {
            let d = gray.get_pixel(x, y)[0] as f64 - mean;
            sum += d * d;
        }
    }
    (sum / region.pixel_count() as f64) as f32
}

/// Luma standard deviation over the whole image.
pub fn stddev(gray: &GrayImage) -> f32 {
    region_variance(gray, full(gray)).sqrt()
}

/// Mean Sobel gradient magnitude over a region's interior pixels.
///
/// Border pixels have no full 3x3 neighborhood and are skipped; regions
/// narrower than 3px in either direction score 0.0.
pub fn region_gradient_mean(gray: &GrayImage, region: Region) -> f32 {
    if region.x1 - region.x0 < 3 || region.y1 - region.y0 < 3 {
        return 0.0;
    }

    let at = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f32;
    let mut sum = 0.0f64;
    let mut count = 0u64;

    for y in (region.y0 + 1)..(region.y1 - 1) {
        for x in (region.x0 + 1)..(region.x1 - 1) {
            let gx = at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x - 1, y)
                - at(x - 1, y + 1);
            let gy = at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x, y - 1)
                - at(x + 1, y - 1);
            sum += (gx * gx + gy * gy).sqrt() as f64;
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

/// Mean Sobel gradient magnitude over the whole image.
pub fn gradient_mean(gray: &GrayImage) -> f32 {
    region_gradient_mean(gray, full(gray))
}
