//! Generic object detection
//!
//! [`YoloDetector`] runs a YOLOv8-style graph and decodes its raw
//! `[1, 4 + C, N]` output into source-space [`Detection`]s.

use crate::{
    config::DetectionConfig,
    error::{PhotoAiError, Result},
    inference::InferenceBackend,
    utils::{CoordinateTransformation, ImagePreprocessor},
};
use image::DynamicImage;
use ndarray::{ArrayD, Axis, Ix2};
use std::cmp::Ordering;

/// Axis-aligned box in integer source pixels, `x2`/`y2` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Whether the pixel `(x, y)` lies inside the box
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.x1..self.x2).contains(&x) && (self.y1..self.y2).contains(&y)
    }
}

/// One detected object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Finds objects in an image
pub trait ObjectDetector {
    /// Detect objects, boxes in source pixel coordinates
    ///
    /// # Errors
    /// - Model unavailable or inference failure
    /// - Zero-size image
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>>;
}

/// YOLOv8-style detector backed by an inference backend
pub struct YoloDetector {
    backend: Box<dyn InferenceBackend + Send>,
    config: DetectionConfig,
}

impl YoloDetector {
    /// Wrap an initialized backend
    ///
    /// # Errors
    /// - Backend has not been initialized
    pub fn new(backend: Box<dyn InferenceBackend + Send>, config: DetectionConfig) -> Result<Self> {
        if !backend.is_initialized() {
            return Err(PhotoAiError::model(
                "Detection backend must be initialized before use",
            ));
        }
        Ok(Self { backend, config })
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let (input, transform) =
            ImagePreprocessor::preprocess_for_inference(image, &self.config.model.preprocessing)?;
        let output = self.backend.infer(&input)?;
        let detections = decode_predictions(
            &output,
            &transform,
            (image.width(), image.height()),
            &self.config,
        )?;
        log::debug!("Detector produced {} boxes", detections.len());
        Ok(detections)
    }
}

/// Candidate box in model-input space
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    class_id: usize,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Self) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// Decode raw YOLOv8 output into source-space detections
///
/// Expects `[1, 4 + C, N]` with rows `cx, cy, w, h, score_0 .. score_C`.
///
/// # Errors
/// - Output is not three-dimensional or has no class rows
pub fn decode_predictions(
    output: &ArrayD<f32>,
    transform: &CoordinateTransformation,
    image_size: (u32, u32),
    config: &DetectionConfig,
) -> Result<Vec<Detection>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(PhotoAiError::model(format!(
            "Unexpected detection output shape {shape:?}, expected [1, 4 + classes, boxes]"
        )));
    }

    let predictions = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<Ix2>()
        .map_err(|e| PhotoAiError::internal(format!("Detection output reshape failed: {e}")))?;
    let attributes = predictions.nrows();
    if attributes <= 4 {
        return Err(PhotoAiError::model(format!(
            "Detection output has {attributes} rows, need box coordinates plus class scores"
        )));
    }

    let mut candidates: Vec<Candidate> = predictions
        .columns()
        .into_iter()
        .filter_map(|column| {
            let (class_id, score) = column
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))?;
            if score.is_nan() || score <= config.confidence_threshold {
                return None;
            }
            let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
            Some(Candidate {
                x1: cx - w / 2.0,
                y1: cy - h / 2.0,
                x2: cx + w / 2.0,
                y2: cy + h / 2.0,
                score,
                class_id,
            })
        })
        .collect();

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= config.max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.iou(&candidate) > config.iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    Ok(kept
        .into_iter()
        .map(|c| Detection {
            bbox: to_source_box(&c, transform, image_size),
            confidence: c.score,
            class_id: c.class_id,
        })
        .collect())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn to_source_box(
    candidate: &Candidate,
    transform: &CoordinateTransformation,
    (width, height): (u32, u32),
) -> BoundingBox {
    let (x1, y1) = transform.to_source(candidate.x1, candidate.y1);
    let (x2, y2) = transform.to_source(candidate.x2, candidate.y2);
    let clamp_x = |v: f32| v.clamp(0.0, width as f32) as u32;
    let clamp_y = |v: f32| v.clamp(0.0, height as f32) as u32;
    BoundingBox {
        x1: clamp_x(x1),
        y1: clamp_y(y1),
        x2: clamp_x(x2),
        y2: clamp_y(y2),
    }
}
