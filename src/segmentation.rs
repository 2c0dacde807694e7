//! Foreground segmentation
//!
//! A [`Segmenter`] turns an image into a single-channel mask aligned to the
//! image, 255 meaning foreground. [`ModelSegmenter`] implements it on top of
//! any [`InferenceBackend`] running an RMBG-style network.

use crate::{
    error::{PhotoAiError, Result},
    inference::InferenceBackend,
    models::PreprocessingConfig,
    utils::ImagePreprocessor,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageBuffer, Luma};
use ndarray::ArrayD;

/// Produces a foreground mask for an image
pub trait Segmenter {
    /// Segment `image`, returning a mask with the image's dimensions
    ///
    /// # Errors
    /// - Model unavailable or inference failure
    /// - Zero-size image
    fn segment(&mut self, image: &DynamicImage) -> Result<GrayImage>;
}

/// Segmenter backed by an inference backend
pub struct ModelSegmenter {
    backend: Box<dyn InferenceBackend + Send>,
    preprocessing: PreprocessingConfig,
}

impl ModelSegmenter {
    /// Wrap an initialized backend
    ///
    /// # Errors
    /// - Backend has not been initialized
    pub fn new(
        backend: Box<dyn InferenceBackend + Send>,
        preprocessing: PreprocessingConfig,
    ) -> Result<Self> {
        if !backend.is_initialized() {
            return Err(PhotoAiError::model(
                "Segmentation backend must be initialized before use",
            ));
        }
        Ok(Self {
            backend,
            preprocessing,
        })
    }
}

impl Segmenter for ModelSegmenter {
    fn segment(&mut self, image: &DynamicImage) -> Result<GrayImage> {
        let (input, _) = ImagePreprocessor::preprocess_for_inference(image, &self.preprocessing)?;
        let output = self.backend.infer(&input)?;
        tensor_to_mask(&output, image.width(), image.height())
    }
}

/// Convert a raw segmentation output into a `width` x `height` mask
///
/// The last two tensor dimensions are taken as the mask plane. The plane is
/// resized to the target dimensions, min-max normalized and scaled to 0-255.
///
/// # Errors
/// - Output has fewer than two dimensions or is empty
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn tensor_to_mask(output: &ArrayD<f32>, width: u32, height: u32) -> Result<GrayImage> {
    let shape = output.shape();
    let (mask_height, mask_width) = match shape {
        [.., h, w] if *h > 0 && *w > 0 => (*h, *w),
        _ => {
            return Err(PhotoAiError::model(format!(
                "Unexpected segmentation output shape {shape:?}"
            )))
        },
    };

    let plane: Vec<f32> = output.iter().take(mask_height * mask_width).copied().collect();
    let plane: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(mask_width as u32, mask_height as u32, plane)
            .ok_or_else(|| PhotoAiError::model("Segmentation output too small for its shape"))?;

    let resized = if (mask_width as u32, mask_height as u32) == (width, height) {
        plane
    } else {
        image::imageops::resize(&plane, width, height, FilterType::Triangle)
    };

    let (min, max) = resized
        .pixels()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), p| {
            (min.min(p[0]), max.max(p[0]))
        });
    let range = max - min;

    let mask = GrayImage::from_fn(width, height, |x, y| {
        let value = resized.get_pixel(x, y)[0];
        let normalized = if range > f32::EPSILON {
            (value - min) / range
        } else {
            value.clamp(0.0, 1.0)
        };
        Luma([(normalized * 255.0).round().clamp(0.0, 255.0) as u8])
    });

    Ok(mask)
}
