//! Worker configuration
//!
//! Configuration is layered: built-in defaults, then an optional JSON file,
//! then `PHOTO_AI_*` environment overrides. The worker binary applies its
//! command-line flags last.

use crate::enhance::EnhanceSettings;
use crate::error::{PhotoAiError, Result};
use crate::models::{ModelSource, ModelSpec};
use crate::plates::PlateFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Environment variable naming a JSON configuration file
pub const CONFIG_PATH_ENV: &str = "PHOTO_AI_CONFIG";
const EXECUTION_PROVIDER_ENV: &str = "PHOTO_AI_EXECUTION_PROVIDER";
const BACKEND_ENV: &str = "PHOTO_AI_BACKEND";
const SEGMENTATION_MODEL_ENV: &str = "PHOTO_AI_SEGMENTATION_MODEL";
const DETECTION_MODEL_ENV: &str = "PHOTO_AI_DETECTION_MODEL";

/// Default Gaussian kernel size for plate blurring
pub const DEFAULT_BLUR_STRENGTH: u32 = 51;

/// Largest Gaussian kernel size a job may request
pub const DEFAULT_MAX_BLUR_STRENGTH: u32 = 255;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = PhotoAiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(PhotoAiError::config(format!(
                "Unknown execution provider '{other}'. Expected one of: auto, cpu, cuda, coreml"
            ))),
        }
    }
}

/// Inference backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, CPU only)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl FromStr for BackendType {
    type Err = PhotoAiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(PhotoAiError::config(format!(
                "Unknown backend '{other}'. Expected one of: onnx, tract"
            ))),
        }
    }
}

/// Encoding used for every image returned in a job result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG, alpha preserved
    #[default]
    Png,
    /// JPEG, alpha dropped
    Jpeg,
}

/// Object detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model: ModelSpec,
    /// Minimum best-class score for a candidate box
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes of one class are suppressed
    pub iou_threshold: f32,
    /// Upper bound on detections kept after suppression
    pub max_detections: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model: ModelSpec::yolov8n(),
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
        }
    }
}

/// Configuration for the photo job worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Inference backend used for both models
    pub backend: BackendType,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Background segmentation model
    pub segmentation: ModelSpec,

    /// Object detector used to find plate candidates
    pub detection: DetectionConfig,

    /// Geometric plate heuristics
    pub plate_filter: PlateFilter,

    /// Enhancement factors
    pub enhance: EnhanceSettings,

    /// Encoding of result images
    pub output_format: OutputFormat,

    /// JPEG quality (1-100, only used for JPEG output)
    pub jpeg_quality: u8,

    /// Blur kernel size used when a job does not specify one
    pub default_blur_strength: u32,

    /// Upper bound on the blur kernel size a job may request
    pub max_blur_strength: u32,

    /// Reject unknown operation names instead of skipping them
    pub strict_operations: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            execution_provider: ExecutionProvider::default(),
            backend: BackendType::default(),
            intra_threads: 0,
            inter_threads: 0,
            segmentation: ModelSpec::rmbg(),
            detection: DetectionConfig::default(),
            plate_filter: PlateFilter::default(),
            enhance: EnhanceSettings::default(),
            output_format: OutputFormat::default(),
            jpeg_quality: 95,
            default_blur_strength: DEFAULT_BLUR_STRENGTH,
            max_blur_strength: DEFAULT_MAX_BLUR_STRENGTH,
            strict_operations: false,
        }
    }
}

impl WorkerConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use photo_ai_worker::{WorkerConfig, ExecutionProvider, BackendType};
    ///
    /// let config = WorkerConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .backend(BackendType::Tract)
    ///     .strict_operations(true)
    ///     .build()
    ///     .unwrap();
    /// assert!(config.strict_operations);
    /// ```
    #[must_use]
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Load configuration: defaults, then the JSON file (explicit path or
    /// `PHOTO_AI_CONFIG`), then environment overrides
    ///
    /// # Errors
    /// - Unreadable or malformed configuration file
    /// - Invalid environment override values
    /// - Validation failures
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok();
        let path = path.or(env_path.as_deref().map(Path::new));

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a JSON file; missing fields take defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid configuration JSON
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PhotoAiError::file_io_error("read config file", path, &e))?;
        serde_json::from_str(&contents).map_err(|e| {
            PhotoAiError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Apply `PHOTO_AI_*` overrides from a variable lookup
    ///
    /// # Errors
    /// - Override value cannot be parsed
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(EXECUTION_PROVIDER_ENV) {
            self.execution_provider = value.parse()?;
        }
        if let Some(value) = lookup(BACKEND_ENV) {
            self.backend = value.parse()?;
        }
        if let Some(value) = lookup(SEGMENTATION_MODEL_ENV) {
            self.segmentation.source = value.parse::<ModelSource>()?;
        }
        if let Some(value) = lookup(DETECTION_MODEL_ENV) {
            self.detection.model.source = value.parse::<ModelSource>()?;
        }
        Ok(())
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - JPEG quality outside 1-100
    /// - Zero default blur strength, or one above `max_blur_strength`
    /// - Detection thresholds outside `[0, 1]`
    /// - Invalid plate filter bounds or enhancement factors
    /// - Invalid model tensor layout
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PhotoAiError::config_value_error(
                "jpeg_quality",
                self.jpeg_quality,
                "1-100",
                Some(95),
            ));
        }

        if self.default_blur_strength == 0 {
            return Err(PhotoAiError::config_value_error(
                "default_blur_strength",
                self.default_blur_strength,
                "positive odd integer",
                Some(DEFAULT_BLUR_STRENGTH),
            ));
        }

        if self.default_blur_strength > self.max_blur_strength {
            return Err(PhotoAiError::config(format!(
                "default_blur_strength ({}) exceeds max_blur_strength ({})",
                self.default_blur_strength, self.max_blur_strength
            )));
        }

        let detection = &self.detection;
        if !(0.0..=1.0).contains(&detection.confidence_threshold) {
            return Err(PhotoAiError::config_value_error(
                "detection.confidence_threshold",
                detection.confidence_threshold,
                "0.0-1.0",
                Some(0.25),
            ));
        }
        if !(0.0..=1.0).contains(&detection.iou_threshold) {
            return Err(PhotoAiError::config_value_error(
                "detection.iou_threshold",
                detection.iou_threshold,
                "0.0-1.0",
                Some(0.7),
            ));
        }
        if detection.max_detections == 0 {
            return Err(PhotoAiError::config(
                "detection.max_detections must be at least 1",
            ));
        }

        self.segmentation.validate("segmentation")?;
        detection.model.validate("detection")?;
        self.plate_filter.validate()?;
        self.enhance.validate()?;
        Ok(())
    }
}

/// Builder for `WorkerConfig`
#[derive(Debug, Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set both intra and inter threads (0 = auto-detect)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    #[must_use]
    pub fn segmentation_model(mut self, spec: ModelSpec) -> Self {
        self.config.segmentation = spec;
        self
    }

    #[must_use]
    pub fn detection(mut self, detection: DetectionConfig) -> Self {
        self.config.detection = detection;
        self
    }

    #[must_use]
    pub fn plate_filter(mut self, filter: PlateFilter) -> Self {
        self.config.plate_filter = filter;
        self
    }

    #[must_use]
    pub fn enhance(mut self, settings: EnhanceSettings) -> Self {
        self.config.enhance = settings;
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Set JPEG quality, clamped to 1-100
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    #[must_use]
    pub fn default_blur_strength(mut self, strength: u32) -> Self {
        self.config.default_blur_strength = strength;
        self
    }

    #[must_use]
    pub fn max_blur_strength(mut self, strength: u32) -> Self {
        self.config.max_blur_strength = strength;
        self
    }

    #[must_use]
    pub fn strict_operations(mut self, strict: bool) -> Self {
        self.config.strict_operations = strict;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any validation failure from [`WorkerConfig::validate`]
    pub fn build(self) -> Result<WorkerConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
