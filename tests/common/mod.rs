//! Shared fakes and image helpers for integration tests

#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use photo_ai_worker::{
    codec,
    detection::{BoundingBox, Detection, ObjectDetector},
    error::Result,
    registry::{DynDetector, DynSegmenter},
    segmentation::Segmenter,
    ModelRegistry, OutputFormat, PhotoAiError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Marks the left half of every image as foreground
pub struct HalfSegmenter;

impl Segmenter for HalfSegmenter {
    fn segment(&mut self, image: &DynamicImage) -> Result<GrayImage> {
        let half = image.width() / 2;
        Ok(GrayImage::from_fn(image.width(), image.height(), |x, _| {
            Luma([if x < half { 255 } else { 0 }])
        }))
    }
}

/// Returns the same detections for every image and records what it saw
#[derive(Clone, Default)]
pub struct ScriptedDetector {
    pub detections: Vec<Detection>,
    pub seen: Arc<Mutex<Vec<DynamicImage>>>,
}

impl ScriptedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            seen: Arc::default(),
        }
    }
}

impl ObjectDetector for ScriptedDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        self.seen.lock().unwrap().push(image.clone());
        Ok(self.detections.clone())
    }
}

/// Load counters for a [`counting_registry`]
#[derive(Clone, Default)]
pub struct LoadCounts {
    pub segmenter: Arc<AtomicUsize>,
    pub detector: Arc<AtomicUsize>,
}

impl LoadCounts {
    pub fn segmenter_loads(&self) -> usize {
        self.segmenter.load(Ordering::SeqCst)
    }

    pub fn detector_loads(&self) -> usize {
        self.detector.load(Ordering::SeqCst)
    }
}

/// Registry over fakes that counts how often each model is loaded
pub fn counting_registry(detector: ScriptedDetector) -> (ModelRegistry, LoadCounts) {
    let counts = LoadCounts::default();
    let segmenter_count = Arc::clone(&counts.segmenter);
    let detector_count = Arc::clone(&counts.detector);
    let registry = ModelRegistry::new(
        move || {
            segmenter_count.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(HalfSegmenter) as DynSegmenter)
        },
        move || {
            detector_count.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(detector.clone()) as DynDetector)
        },
    );
    (registry, counts)
}

/// Registry whose loaders always fail, counting attempts
pub fn failing_registry() -> (ModelRegistry, LoadCounts) {
    let counts = LoadCounts::default();
    let segmenter_count = Arc::clone(&counts.segmenter);
    let detector_count = Arc::clone(&counts.detector);
    let registry = ModelRegistry::new(
        move || {
            segmenter_count.fetch_add(1, Ordering::SeqCst);
            Err(PhotoAiError::model("segmentation weights unavailable"))
        },
        move || {
            detector_count.fetch_add(1, Ordering::SeqCst);
            Err(PhotoAiError::model("detection weights unavailable"))
        },
    );
    (registry, counts)
}

/// Plate-shaped detection in source pixel coordinates
pub fn plate(x1: u32, y1: u32, x2: u32, y2: u32) -> Detection {
    Detection {
        bbox: BoundingBox { x1, y1, x2, y2 },
        confidence: 0.9,
        class_id: 0,
    }
}

/// Black and white squares of `cell` pixels
pub fn checkerboard(width: u32, height: u32, cell: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Smooth color ramp with every channel in use
pub fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) * 127 / (width + height).max(1)) as u8,
        ])
    })
}

pub fn to_base64(image: RgbImage) -> String {
    codec::encode_image(&DynamicImage::ImageRgb8(image), OutputFormat::Png, 95).unwrap()
}

/// Decode a result image without forcing RGB, so alpha stays visible
pub fn from_base64(text: &str) -> DynamicImage {
    image::load_from_memory(&codec::decode_bytes(text).unwrap()).unwrap()
}
