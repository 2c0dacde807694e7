//! Background removal and replacement

use crate::{
    error::{PhotoAiError, Result},
    segmentation::Segmenter,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, Rgb, RgbImage, Rgba, RgbaImage};

/// What to put behind the segmented foreground
#[derive(Debug, Clone)]
pub enum BackgroundOption {
    /// Keep only the foreground, masked through the alpha channel
    Transparent,
    /// Flat RGB background
    SolidColor([u8; 3]),
    /// Image background, resized to the foreground's dimensions
    BackgroundImage(DynamicImage),
}

impl BackgroundOption {
    /// Pick an option from job parameters; an image wins over a color
    #[must_use]
    pub fn from_parts(color: Option<[u8; 3]>, image: Option<DynamicImage>) -> Self {
        match (image, color) {
            (Some(image), _) => Self::BackgroundImage(image),
            (None, Some(color)) => Self::SolidColor(color),
            (None, None) => Self::Transparent,
        }
    }
}

/// Segment `image` and composite its foreground over `option`
///
/// The result has the input's dimensions. It is RGB when a background was
/// given and RGBA for [`BackgroundOption::Transparent`].
///
/// # Errors
/// - Segmentation failures (zero-size image, model unavailable)
/// - Mask dimensions differ from the image
pub fn remove_background(
    image: &DynamicImage,
    option: &BackgroundOption,
    segmenter: &mut dyn Segmenter,
) -> Result<DynamicImage> {
    let mask = segmenter.segment(image)?;
    let foreground = image.to_rgb8();
    let (width, height) = foreground.dimensions();
    if mask.dimensions() != (width, height) {
        let (mask_width, mask_height) = mask.dimensions();
        return Err(PhotoAiError::model(format!(
            "segmentation mask is {mask_width}x{mask_height}, expected {width}x{height}"
        )));
    }

    let output = match option {
        BackgroundOption::Transparent => DynamicImage::ImageRgba8(apply_alpha(&foreground, &mask)),
        BackgroundOption::SolidColor(color) => {
            let background = RgbImage::from_pixel(width, height, Rgb(*color));
            DynamicImage::ImageRgb8(composite(&foreground, &background, &mask))
        },
        BackgroundOption::BackgroundImage(background) => {
            let background = background
                .resize_exact(width, height, FilterType::CatmullRom)
                .to_rgb8();
            DynamicImage::ImageRgb8(composite(&foreground, &background, &mask))
        },
    };
    Ok(output)
}

/// Attach `mask` to `foreground` as its alpha channel
#[must_use]
pub fn apply_alpha(foreground: &RgbImage, mask: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(foreground.width(), foreground.height(), |x, y| {
        let Rgb([r, g, b]) = *foreground.get_pixel(x, y);
        Rgba([r, g, b, mask.get_pixel(x, y)[0]])
    })
}

/// Blend `foreground` over `background` using `mask` as per-pixel opacity
///
/// All three buffers must share dimensions.
#[must_use]
pub fn composite(foreground: &RgbImage, background: &RgbImage, mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(foreground.width(), foreground.height(), |x, y| {
        let alpha = u32::from(mask.get_pixel(x, y)[0]);
        let fg = foreground.get_pixel(x, y).0;
        let bg = background.get_pixel(x, y).0;
        let mut out = [0_u8; 3];
        for ((out, fg), bg) in out.iter_mut().zip(fg).zip(bg) {
            let blended = u32::from(fg) * alpha + u32::from(bg) * (255 - alpha);
            *out = ((blended + 127) / 255) as u8;
        }
        Rgb(out)
    })
}
