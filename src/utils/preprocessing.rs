//! Shared image preprocessing utilities
//!
//! Both models take an NCHW `f32` tensor; they differ only in how the source
//! image is fitted into the input (stretched for segmentation, letterboxed for
//! detection) and in normalization.

use crate::{
    error::{PhotoAiError, Result},
    models::{PreprocessingConfig, ResizeMode},
};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

/// Mapping between model-input pixel coordinates and source coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransformation {
    /// Horizontal scale applied to the source image
    pub scale_x: f32,
    /// Vertical scale applied to the source image
    pub scale_y: f32,
    /// Left padding inside the model input
    pub offset_x: f32,
    /// Top padding inside the model input
    pub offset_y: f32,
}

impl CoordinateTransformation {
    /// Map a point in model-input space back to the source image
    #[must_use]
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x) / self.scale_x,
            (y - self.offset_y) / self.scale_y,
        )
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Fit an image into the model input and convert it to a normalized tensor
    ///
    /// # Errors
    /// - Zero-size source image or target size
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, CoordinateTransformation)> {
        let [target_width, target_height] = config.target_size;
        let (orig_width, orig_height) = (image.width(), image.height());

        if orig_width == 0 || orig_height == 0 {
            return Err(PhotoAiError::model(format!(
                "Cannot run inference on a zero-size image ({orig_width}x{orig_height})"
            )));
        }
        if target_width == 0 || target_height == 0 {
            return Err(PhotoAiError::config("Model input size must be non-zero"));
        }

        let rgb_image = image.to_rgb8();

        let (canvas, transform) = match config.resize {
            ResizeMode::Stretch => {
                let resized = image::imageops::resize(
                    &rgb_image,
                    target_width,
                    target_height,
                    FilterType::Triangle,
                );
                let transform = CoordinateTransformation {
                    scale_x: target_width as f32 / orig_width as f32,
                    scale_y: target_height as f32 / orig_height as f32,
                    offset_x: 0.0,
                    offset_y: 0.0,
                };
                (resized, transform)
            },
            ResizeMode::Letterbox { padding } => {
                let scale = (target_width as f32 / orig_width as f32)
                    .min(target_height as f32 / orig_height as f32);
                let new_width = ((orig_width as f32 * scale).round() as u32).clamp(1, target_width);
                let new_height =
                    ((orig_height as f32 * scale).round() as u32).clamp(1, target_height);

                let resized = image::imageops::resize(
                    &rgb_image,
                    new_width,
                    new_height,
                    FilterType::Triangle,
                );

                let offset_x = (target_width - new_width) / 2;
                let offset_y = (target_height - new_height) / 2;
                let mut canvas = RgbImage::from_pixel(
                    target_width,
                    target_height,
                    Rgb([padding, padding, padding]),
                );
                image::imageops::replace(&mut canvas, &resized, i64::from(offset_x), i64::from(offset_y));

                let transform = CoordinateTransformation {
                    scale_x: new_width as f32 / orig_width as f32,
                    scale_y: new_height as f32 / orig_height as f32,
                    offset_x: offset_x as f32,
                    offset_y: offset_y as f32,
                };
                (canvas, transform)
            },
        };

        Ok((Self::canvas_to_tensor(&canvas, config), transform))
    }

    /// Convert canvas to normalized NCHW tensor
    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in canvas.enumerate_pixels() {
            for channel in 0..3 {
                let value = f32::from(pixel[channel]) / 255.0;
                let mean = config.normalization_mean[channel];
                let std = config.normalization_std[channel];
                tensor[[0, channel, y as usize, x as usize]] = (value - mean) / std;
            }
        }

        tensor
    }
}
