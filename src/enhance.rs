//! Deterministic photo enhancement
//!
//! Three fixed steps applied in order: per-channel auto-contrast, a mild
//! sharpen and a mild saturation boost. The sharpen and saturation steps
//! extrapolate away from a degenerate image (a smoothed copy and a grayscale
//! copy respectively), clipping to the 8-bit range. Alpha is carried through
//! unchanged.

use crate::error::{PhotoAiError, Result};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Enhancement factors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceSettings {
    /// Percent of each histogram tail ignored by auto-contrast
    pub cutoff_percent: f32,
    /// Sharpness factor (1.0 = unchanged)
    pub sharpness: f32,
    /// Saturation factor (1.0 = unchanged, 0.0 = grayscale)
    pub saturation: f32,
}

impl Default for EnhanceSettings {
    fn default() -> Self {
        Self {
            cutoff_percent: 1.0,
            sharpness: 1.2,
            saturation: 1.1,
        }
    }
}

impl EnhanceSettings {
    /// # Errors
    /// - Cutoff outside `[0, 50)`
    /// - Negative or non-finite factors
    pub fn validate(&self) -> Result<()> {
        if !(0.0..50.0).contains(&self.cutoff_percent) {
            return Err(PhotoAiError::config_value_error(
                "enhance.cutoff_percent",
                self.cutoff_percent,
                "0.0-50.0 (exclusive)",
                Some(1.0),
            ));
        }
        for (name, factor, recommended) in [
            ("enhance.sharpness", self.sharpness, 1.2),
            ("enhance.saturation", self.saturation, 1.1),
        ] {
            if !factor.is_finite() || factor < 0.0 {
                return Err(PhotoAiError::config_value_error(
                    name,
                    factor,
                    "finite, >= 0.0",
                    Some(recommended),
                ));
            }
        }
        Ok(())
    }
}

/// Apply auto-contrast, sharpness and saturation in that order
#[must_use]
pub fn enhance(image: DynamicImage, settings: &EnhanceSettings) -> DynamicImage {
    let alpha = image.color().has_alpha().then(|| alpha_channel(&image));

    let mut rgb = image.into_rgb8();
    autocontrast(&mut rgb, settings.cutoff_percent);
    let rgb = adjust_sharpness(&rgb, settings.sharpness);
    let rgb = adjust_saturation(&rgb, settings.saturation);

    match alpha {
        Some(alpha) => DynamicImage::ImageRgba8(RgbaImage::from_fn(
            rgb.width(),
            rgb.height(),
            |x, y| {
                let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
                Rgba([r, g, b, alpha.get_pixel(x, y)[0]])
            },
        )),
        None => DynamicImage::ImageRgb8(rgb),
    }
}

fn alpha_channel(image: &DynamicImage) -> GrayImage {
    let rgba = image.to_rgba8();
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        Luma([rgba.get_pixel(x, y)[3]])
    })
}

/// Stretch each channel so its clipped histogram spans 0-255
///
/// `cutoff_percent` of the pixels are discarded from each end of every
/// channel's histogram before the range is measured. A channel whose remaining
/// range is empty is left unchanged.
#[allow(clippy::indexing_slicing)]
pub fn autocontrast(image: &mut RgbImage, cutoff_percent: f32) {
    let mut histograms = [[0_u64; 256]; 3];
    for pixel in image.pixels() {
        for (histogram, value) in histograms.iter_mut().zip(pixel.0) {
            histogram[usize::from(value)] += 1;
        }
    }

    let luts = histograms.map(|histogram| contrast_lut(histogram, cutoff_percent));

    for pixel in image.pixels_mut() {
        for (lut, value) in luts.iter().zip(pixel.0.iter_mut()) {
            *value = lut[usize::from(*value)];
        }
    }
}

#[allow(clippy::indexing_slicing)]
fn contrast_lut(mut histogram: [u64; 256], cutoff_percent: f32) -> [u8; 256] {
    let total: u64 = histogram.iter().sum();
    let cut = (total as f64 * f64::from(cutoff_percent) / 100.0).floor() as u64;

    if cut > 0 {
        trim_tail(histogram.iter_mut(), cut);
        trim_tail(histogram.iter_mut().rev(), cut);
    }

    let lo = histogram.iter().position(|&count| count > 0);
    let hi = histogram.iter().rposition(|&count| count > 0);

    let mut lut = [0_u8; 256];
    match (lo, hi) {
        (Some(lo), Some(hi)) if hi > lo => {
            let scale = 255.0 / (hi - lo) as f64;
            let offset = -(lo as f64) * scale;
            for (ix, entry) in lut.iter_mut().enumerate() {
                *entry = (ix as f64 * scale + offset).trunc().clamp(0.0, 255.0) as u8;
            }
        },
        _ => {
            for (ix, entry) in lut.iter_mut().enumerate() {
                *entry = ix as u8;
            }
        },
    }
    lut
}

/// Remove `cut` samples from one end of a histogram
fn trim_tail<'a>(bins: impl Iterator<Item = &'a mut u64>, mut cut: u64) {
    for count in bins {
        if cut > *count {
            cut -= *count;
            *count = 0;
        } else {
            *count -= cut;
            break;
        }
    }
}

/// Extrapolate `image` away from `degenerate` by `factor`, clipping to 0-255
fn blend(degenerate: &RgbImage, image: &RgbImage, factor: f32) -> RgbImage {
    let mut out = image.clone();
    for ((pixel, base), target) in out.pixels_mut().zip(degenerate.pixels()).zip(image.pixels()) {
        for c in 0..3 {
            let value = f32::from(base[c]) + factor * (f32::from(target[c]) - f32::from(base[c]));
            pixel[c] = if value <= 0.0 {
                0
            } else if value >= 255.0 {
                255
            } else {
                value as u8
            };
        }
    }
    out
}

/// 3x3 smoothing (center weight 5, neighbours 1); the outer ring is copied
#[allow(clippy::indexing_slicing)]
fn smooth(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut out = image.clone();
    if width < 3 || height < 3 {
        return out;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut sums = [0_u32; 3];
            for dy in 0..3 {
                for dx in 0..3 {
                    let weight = if dx == 1 && dy == 1 { 5 } else { 1 };
                    let pixel = image.get_pixel(x + dx - 1, y + dy - 1);
                    for (sum, value) in sums.iter_mut().zip(pixel.0) {
                        *sum += weight * u32::from(value);
                    }
                }
            }
            // Round to nearest on division by the kernel weight of 13
            *out.get_pixel_mut(x, y) = Rgb(sums.map(|sum| ((sum + 6) / 13) as u8));
        }
    }
    out
}

/// Sharpen (`factor` > 1) or soften (`factor` < 1) against a smoothed copy
#[must_use]
pub fn adjust_sharpness(image: &RgbImage, factor: f32) -> RgbImage {
    blend(&smooth(image), image, factor)
}

/// Scale saturation against the ITU-R 601-2 luma of each pixel
#[must_use]
pub fn adjust_saturation(image: &RgbImage, factor: f32) -> RgbImage {
    let gray = RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let l = luma(image.get_pixel(x, y));
        Rgb([l, l, l])
    });
    blend(&gray, image, factor)
}

/// `L = 0.299 R + 0.587 G + 0.114 B` in 16-bit fixed point
fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0.map(u32::from);
    ((r * 19_595 + g * 38_470 + b * 7_471 + 0x8000) >> 16) as u8
}
