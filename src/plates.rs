//! License-plate blurring
//!
//! There is no plate-specific model: boxes from a generic object detector are
//! kept when their shape and size look like a plate, then blurred in place.
//! The heuristic is approximate and will produce false positives and misses.

use crate::{
    detection::{BoundingBox, Detection, ObjectDetector},
    error::{PhotoAiError, Result},
};
use image::{DynamicImage, ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};

/// Geometric bounds a detection must fall strictly inside to count as a plate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateFilter {
    /// Lower bound on width / height
    pub min_aspect_ratio: f64,
    /// Upper bound on width / height
    pub max_aspect_ratio: f64,
    /// Lower bound on box area / image area
    pub min_relative_size: f64,
    /// Upper bound on box area / image area
    pub max_relative_size: f64,
}

impl Default for PlateFilter {
    fn default() -> Self {
        Self {
            min_aspect_ratio: 1.5,
            max_aspect_ratio: 6.0,
            min_relative_size: 0.001,
            max_relative_size: 0.05,
        }
    }
}

impl PlateFilter {
    /// Check the bounds are ordered and finite
    ///
    /// # Errors
    /// - Negative or non-finite bounds
    /// - Minimum not below maximum
    pub fn validate(&self) -> Result<()> {
        let bounds = [
            self.min_aspect_ratio,
            self.max_aspect_ratio,
            self.min_relative_size,
            self.max_relative_size,
        ];
        if bounds.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return Err(PhotoAiError::config(
                "plate_filter bounds must be finite and non-negative",
            ));
        }
        if self.min_aspect_ratio >= self.max_aspect_ratio {
            return Err(PhotoAiError::config(format!(
                "plate_filter.min_aspect_ratio ({}) must be below max_aspect_ratio ({})",
                self.min_aspect_ratio, self.max_aspect_ratio
            )));
        }
        if self.min_relative_size >= self.max_relative_size {
            return Err(PhotoAiError::config(format!(
                "plate_filter.min_relative_size ({}) must be below max_relative_size ({})",
                self.min_relative_size, self.max_relative_size
            )));
        }
        Ok(())
    }

    /// Whether a box in an image of `width` x `height` looks like a plate
    #[must_use]
    pub fn is_plate_candidate(&self, bbox: &BoundingBox, width: u32, height: u32) -> bool {
        let image_area = f64::from(width) * f64::from(height);
        if image_area <= 0.0 {
            return false;
        }
        let aspect_ratio = f64::from(bbox.width()) / f64::from(bbox.height().max(1));
        let relative_size = bbox.area() as f64 / image_area;

        aspect_ratio > self.min_aspect_ratio
            && aspect_ratio < self.max_aspect_ratio
            && relative_size > self.min_relative_size
            && relative_size < self.max_relative_size
    }

    /// Boxes of the detections that pass the filter
    #[must_use]
    pub fn select(&self, detections: &[Detection], width: u32, height: u32) -> Vec<BoundingBox> {
        detections
            .iter()
            .map(|d| d.bbox)
            .filter(|bbox| self.is_plate_candidate(bbox, width, height))
            .collect()
    }
}

/// Turn a requested blur strength into an odd kernel size
///
/// Even values round up to the next odd value, which must not exceed
/// `max_strength`.
///
/// # Errors
/// - Zero or negative strength
/// - Kernel size above `max_strength`
pub fn normalize_blur_strength(strength: i64, max_strength: u32) -> Result<u32> {
    if strength <= 0 {
        return Err(PhotoAiError::config(format!(
            "blur_strength must be a positive integer, got {strength}"
        )));
    }
    let odd = if strength % 2 == 0 { strength + 1 } else { strength };
    match u32::try_from(odd) {
        Ok(size) if size <= max_strength => Ok(size),
        _ => Err(PhotoAiError::config_value_error(
            "blur_strength",
            strength,
            &format!("1-{max_strength}"),
            Some(i64::from(crate::config::DEFAULT_BLUR_STRENGTH)),
        )),
    }
}

/// Blur every plate-like region found by `detector`
///
/// Pixels outside the selected boxes are left untouched.
///
/// # Errors
/// - Invalid blur strength
/// - Detector failures
pub fn blur_plates(
    image: DynamicImage,
    blur_strength: i64,
    max_blur_strength: u32,
    detector: &mut dyn ObjectDetector,
    filter: &PlateFilter,
) -> Result<DynamicImage> {
    let kernel_size = normalize_blur_strength(blur_strength, max_blur_strength)?;
    let (width, height) = (image.width(), image.height());

    let detections = detector.detect(&image)?;
    let plates = filter.select(&detections, width, height);
    log::debug!(
        "{} of {} detections look like plates",
        plates.len(),
        detections.len()
    );

    if plates.is_empty() {
        return Ok(image);
    }

    Ok(match image {
        DynamicImage::ImageRgb8(mut buffer) => {
            blur_boxes(&mut buffer, &plates, kernel_size);
            DynamicImage::ImageRgb8(buffer)
        },
        DynamicImage::ImageRgba8(mut buffer) => {
            blur_boxes(&mut buffer, &plates, kernel_size);
            DynamicImage::ImageRgba8(buffer)
        },
        other if other.color().has_alpha() => {
            let mut buffer = other.to_rgba8();
            blur_boxes(&mut buffer, &plates, kernel_size);
            DynamicImage::ImageRgba8(buffer)
        },
        other => {
            let mut buffer = other.to_rgb8();
            blur_boxes(&mut buffer, &plates, kernel_size);
            DynamicImage::ImageRgb8(buffer)
        },
    })
}

fn blur_boxes<P>(image: &mut ImageBuffer<P, Vec<u8>>, boxes: &[BoundingBox], kernel_size: u32)
where
    P: Pixel<Subpixel = u8>,
{
    for bbox in boxes {
        gaussian_blur_region(image, bbox, kernel_size);
    }
}

/// 1D Gaussian weights for an odd `size`
///
/// Sigma follows OpenCV's rule for a zero sigma, including its fixed tables
/// for the small kernel sizes.
#[must_use]
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    match size {
        0 | 1 => vec![1.0],
        3 => vec![0.25, 0.5, 0.25],
        5 => vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
        7 => vec![
            0.031_25, 0.109_375, 0.218_75, 0.281_25, 0.218_75, 0.109_375, 0.031_25,
        ],
        _ => {
            let sigma = 0.3 * ((f64::from(size) - 1.0) * 0.5 - 1.0) + 0.8;
            let half = f64::from(size / 2);
            let weights: Vec<f64> = (0..size)
                .map(|i| {
                    let d = f64::from(i) - half;
                    (-(d * d) / (2.0 * sigma * sigma)).exp()
                })
                .collect();
            let sum: f64 = weights.iter().sum();
            weights.into_iter().map(|w| (w / sum) as f32).collect()
        },
    }
}

/// Mirror an out-of-range index back into `0..len` without repeating the edge
fn reflect_101(index: i64, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let len = len as i64;
    let period = 2 * (len - 1);
    let wrapped = index.rem_euclid(period);
    (if wrapped >= len { period - wrapped } else { wrapped }) as usize
}

/// Gaussian-blur the pixels inside `bbox` in place
///
/// The box is clamped to the image. Only pixels inside the box feed the
/// kernel; edges are mirrored within the box.
#[allow(clippy::indexing_slicing)]
pub fn gaussian_blur_region<P>(image: &mut ImageBuffer<P, Vec<u8>>, bbox: &BoundingBox, kernel_size: u32)
where
    P: Pixel<Subpixel = u8>,
{
    let x1 = bbox.x1.min(image.width());
    let y1 = bbox.y1.min(image.height());
    let x2 = bbox.x2.min(image.width());
    let y2 = bbox.y2.min(image.height());
    if x2 <= x1 || y2 <= y1 || kernel_size <= 1 {
        return;
    }

    let (w, h) = ((x2 - x1) as usize, (y2 - y1) as usize);
    let channels = usize::from(P::CHANNEL_COUNT);
    let kernel = gaussian_kernel(kernel_size);
    let half = (kernel.len() / 2) as i64;

    let mut region = vec![0.0_f32; w * h * channels];
    for y in 0..h {
        for x in 0..w {
            let pixel = image.get_pixel(x1 + x as u32, y1 + y as u32);
            for (c, value) in pixel.channels().iter().enumerate() {
                region[(y * w + x) * channels + c] = f32::from(*value);
            }
        }
    }

    let mut horizontal = vec![0.0_f32; region.len()];
    for y in 0..h {
        for x in 0..w {
            for c in 0..channels {
                let mut acc = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    let sx = reflect_101(x as i64 + k as i64 - half, w);
                    acc += weight * region[(y * w + sx) * channels + c];
                }
                horizontal[(y * w + x) * channels + c] = acc;
            }
        }
    }

    for y in 0..h {
        for x in 0..w {
            let pixel = image.get_pixel_mut(x1 + x as u32, y1 + y as u32);
            for (c, value) in pixel.channels_mut().iter_mut().enumerate() {
                let mut acc = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    let sy = reflect_101(y as i64 + k as i64 - half, h);
                    acc += weight * horizontal[(sy * w + x) * channels + c];
                }
                *value = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
