//! Model specifications and source resolution

use crate::cache::ModelCache;
use crate::error::{PhotoAiError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a model's ONNX graph comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSource {
    /// ONNX file on the local filesystem
    External { path: PathBuf },
    /// File inside a `HuggingFace` repository, fetched into the model cache
    HuggingFace {
        repo: String,
        file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    },
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::External { path } => format!(
                "external:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            Self::HuggingFace { repo, file, .. } => format!("hf:{repo}/{file}"),
        }
    }

    /// Resolve the source to an existing local ONNX file
    ///
    /// # Errors
    /// - External file does not exist
    /// - `HuggingFace` file has not been downloaded into the cache
    pub fn resolve(&self, cache: &ModelCache) -> Result<PathBuf> {
        let path = match self {
            Self::External { path } => path.clone(),
            Self::HuggingFace { repo, file, .. } => cache.model_file_path(repo, file),
        };

        if path.is_file() {
            Ok(path)
        } else {
            Err(PhotoAiError::model_error_with_context(
                "locate",
                &path,
                "file not found",
                &[
                    "run `photo-ai-worker --download-models`",
                    "point PHOTO_AI_SEGMENTATION_MODEL / PHOTO_AI_DETECTION_MODEL at a local .onnx file",
                ],
            ))
        }
    }
}

impl FromStr for ModelSource {
    type Err = PhotoAiError;

    /// Parse `hf:<owner>/<repo>/<path/in/repo.onnx>` or a filesystem path
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PhotoAiError::config("Model source cannot be empty"));
        }

        let Some(rest) = s.strip_prefix("hf:") else {
            return Ok(Self::External {
                path: PathBuf::from(s),
            });
        };

        let mut parts = rest.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(repo), Some(file))
                if !owner.is_empty() && !repo.is_empty() && !file.is_empty() =>
            {
                Ok(Self::HuggingFace {
                    repo: format!("{owner}/{repo}"),
                    file: file.to_string(),
                    sha256: None,
                })
            },
            _ => Err(PhotoAiError::config(format!(
                "Invalid HuggingFace model source '{s}'. Expected hf:<owner>/<repo>/<file>"
            ))),
        }
    }
}

/// How an image is fitted into the model's input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResizeMode {
    /// Resize to the target size ignoring aspect ratio
    Stretch,
    /// Aspect-preserving resize, centred on a constant-colour canvas
    Letterbox { padding: u8 },
}

/// Tensor preprocessing parameters for a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Model input size `[width, height]`
    pub target_size: [u32; 2],
    /// Per-channel mean subtracted after scaling to `[0, 1]`
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation
    pub normalization_std: [f32; 3],
    pub resize: ResizeMode,
}

/// Complete model specification: source plus tensor layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub preprocessing: PreprocessingConfig,
}

impl ModelSpec {
    /// BRIA RMBG-1.4 salient object segmentation
    #[must_use]
    pub fn rmbg() -> Self {
        Self {
            source: ModelSource::HuggingFace {
                repo: "briaai/RMBG-1.4".to_string(),
                file: "onnx/model.onnx".to_string(),
                sha256: None,
            },
            preprocessing: PreprocessingConfig {
                target_size: [1024, 1024],
                normalization_mean: [0.5, 0.5, 0.5],
                normalization_std: [1.0, 1.0, 1.0],
                resize: ResizeMode::Stretch,
            },
        }
    }

    /// YOLOv8n generic object detector exported to ONNX
    #[must_use]
    pub fn yolov8n() -> Self {
        Self {
            source: ModelSource::External {
                path: PathBuf::from("models/yolov8n.onnx"),
            },
            preprocessing: PreprocessingConfig {
                target_size: [640, 640],
                normalization_mean: [0.0, 0.0, 0.0],
                normalization_std: [1.0, 1.0, 1.0],
                resize: ResizeMode::Letterbox { padding: 114 },
            },
        }
    }

    /// Validate tensor layout parameters
    ///
    /// # Errors
    /// - Zero target size
    /// - Non-positive normalization standard deviation
    pub fn validate(&self, name: &str) -> Result<()> {
        let [width, height] = self.preprocessing.target_size;
        if width == 0 || height == 0 {
            return Err(PhotoAiError::config(format!(
                "{name} model input size must be non-zero, got {width}x{height}"
            )));
        }
        if self
            .preprocessing
            .normalization_std
            .iter()
            .any(|std| !std.is_finite() || *std <= 0.0)
        {
            return Err(PhotoAiError::config(format!(
                "{name} model normalization std must be positive"
            )));
        }
        if let ModelSource::External { path } = &self.source {
            if path.as_os_str().is_empty() {
                return Err(PhotoAiError::config(format!(
                    "{name} model path cannot be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Size of a model file for logging
pub(crate) fn model_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
