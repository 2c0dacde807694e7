//! Base64 image codec for job payloads

use crate::config::OutputFormat;
use crate::error::{PhotoAiError, Result};
use base64::{engine::general_purpose, Engine};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Strip an optional `data:<mime>;base64,` prefix
fn strip_data_uri(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with("data:") {
        trimmed
            .split_once(',')
            .map_or("", |(_, payload)| payload)
    } else {
        trimmed
    }
}

/// Decode base64 text into raw bytes
///
/// # Errors
/// - Empty payload
/// - Malformed base64
pub fn decode_bytes(text: &str) -> Result<Vec<u8>> {
    let payload: String = strip_data_uri(text)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if payload.is_empty() {
        return Err(PhotoAiError::decode("Empty base64 payload"));
    }
    general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| PhotoAiError::decode(format!("Invalid base64 data: {e}")))
}

/// Decode base64 text (optionally a data URI) into an RGB image
///
/// # Errors
/// - Malformed base64
/// - Unsupported or corrupt image data
pub fn decode_image(text: &str) -> Result<DynamicImage> {
    let bytes = decode_bytes(text)?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| PhotoAiError::decode(format!("Failed to decode image from bytes: {e}")))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// Encode an image into raw bytes in the requested format
///
/// PNG keeps an alpha channel when the image has one; JPEG always writes RGB.
///
/// # Errors
/// - Encoder failure
pub fn encode_bytes(image: &DynamicImage, format: OutputFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    match format {
        OutputFormat::Png => {
            image.write_to(&mut cursor, ImageFormat::Png)?;
        },
        OutputFormat::Jpeg => {
            let rgb_image = image.to_rgb8();
            let mut jpeg_encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, jpeg_quality);
            jpeg_encoder.encode_image(&rgb_image)?;
        },
    }
    Ok(buffer)
}

/// Encode an image as base64 text
///
/// # Errors
/// - Encoder failure
pub fn encode_image(image: &DynamicImage, format: OutputFormat, jpeg_quality: u8) -> Result<String> {
    let bytes = encode_bytes(image, format, jpeg_quality)?;
    Ok(general_purpose::STANDARD.encode(bytes))
}
