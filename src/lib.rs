#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Photo AI Worker
//!
//! A serverless photo job worker. Each job carries a base64 image and an
//! ordered list of operations; every operation consumes the previous one's
//! output and all intermediate images are returned alongside the final one.
//!
//! ## Operations
//!
//! - **`remove_background`**: segmentation mask from an RMBG-style model,
//!   applied as alpha or composited over a solid color or background image
//! - **`blur_plates`**: YOLO detections filtered by license plate geometry,
//!   each region Gaussian-blurred in place
//! - **`enhance`**: per-channel auto-contrast, a mild sharpen and a mild
//!   saturation boost (the default when a job names no operations)
//!
//! ## Backends
//!
//! - `onnx` (default): ONNX Runtime with CPU, CUDA and `CoreML` providers
//! - `tract` (default): pure Rust inference
//!
//! Models load lazily on first use and stay resident for the life of the
//! process; see [`ModelRegistry`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photo_ai_worker::{
//!     DefaultBackendFactory, JobDispatcher, JobRequest, ModelCache, ModelRegistry, WorkerConfig,
//! };
//! use std::sync::Arc;
//!
//! # fn example(image_base64: String) -> anyhow::Result<()> {
//! let config = WorkerConfig::default();
//! let registry =
//!     ModelRegistry::from_config(&config, Arc::new(DefaultBackendFactory), ModelCache::new()?);
//! let dispatcher = JobDispatcher::new(&registry, &config);
//!
//! let request = JobRequest {
//!     image: Some(image_base64),
//!     operations: Some(vec!["remove_background".into(), "enhance".into()]),
//!     background_color: Some(vec![255, 255, 255]),
//!     ..JobRequest::default()
//! };
//! let result = dispatcher.handle(&request);
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): worker binary, tracing subscriber and download progress
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output for the worker binary
//!
//! ## Backend Selection
//!
//! ```rust,no_run
//! use photo_ai_worker::backends::{OnnxBackend, TractBackend};
//!
//! #[cfg(feature = "onnx")]
//! let onnx_backend = OnnxBackend::new();
//!
//! #[cfg(feature = "tract")]
//! let tract_backend = TractBackend::new();
//! ```

pub mod background;
pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod config;
pub mod detection;
pub mod dispatcher;
pub mod download;
pub mod enhance;
pub mod error;
pub mod inference;
pub mod job;
pub mod models;
pub mod plates;
pub mod registry;
pub mod segmentation;
pub mod tracing_config;
pub mod utils;

pub use background::{remove_background, BackgroundOption};
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{
    BackendType, DetectionConfig, ExecutionProvider, OutputFormat, WorkerConfig,
    WorkerConfigBuilder,
};
pub use detection::{BoundingBox, Detection, ObjectDetector, YoloDetector};
pub use dispatcher::{JobDispatcher, JobOutput};
pub use download::ModelDownloader;
pub use enhance::{enhance, EnhanceSettings};
pub use error::{ErrorKind, PhotoAiError, Result};
pub use inference::{BackendFactory, DefaultBackendFactory, InferenceBackend, SessionOptions};
pub use job::{JobEnvelope, JobRequest, JobResponse, JobResult, Operation};
pub use models::{ModelSource, ModelSpec, PreprocessingConfig, ResizeMode};
pub use plates::{blur_plates, PlateFilter};
pub use registry::ModelRegistry;
pub use segmentation::{ModelSegmenter, Segmenter};
pub use utils::{ExecutionProviderManager, ProviderInfo};

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use tracing_config::{TracingConfig, TracingFormat};
