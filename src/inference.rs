//! Inference backend abstraction

use crate::config::{BackendType, ExecutionProvider, WorkerConfig};
use crate::error::{PhotoAiError, Result};
use ndarray::{Array4, ArrayD};
use std::path::PathBuf;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Everything a backend needs to build a session for one model
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Local ONNX file
    pub model_path: PathBuf,
    /// Fixed NCHW input shape fed to the model
    pub input_shape: [usize; 4],
    pub execution_provider: ExecutionProvider,
    /// Intra-op threads (0 = auto)
    pub intra_threads: usize,
    /// Inter-op threads (0 = auto)
    pub inter_threads: usize,
}

impl SessionOptions {
    /// Session options for a model file using the worker's runtime settings
    #[must_use]
    pub fn from_worker_config(
        model_path: PathBuf,
        target_size: [u32; 2],
        config: &WorkerConfig,
    ) -> Self {
        let [width, height] = target_size;
        Self {
            model_path,
            input_shape: [1, 3, height as usize, width as usize],
            execution_provider: config.execution_provider,
            intra_threads: config.intra_threads,
            inter_threads: config.inter_threads,
        }
    }
}

/// Trait for inference backends
pub trait InferenceBackend {
    /// Load the model and build the inference session
    ///
    /// Returns the model load time, or `None` when already initialized.
    ///
    /// # Errors
    /// - Model file missing or unreadable
    /// - Session construction failures
    fn initialize(&mut self, options: &SessionOptions) -> Result<Option<Duration>>;

    /// Run inference on an NCHW input tensor and return the first output
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Tensor conversion errors
    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Short backend name for logging
    fn name(&self) -> &'static str;
}

/// Creates inference backends by type
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend instance
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(&self, backend_type: BackendType)
        -> Result<Box<dyn InferenceBackend + Send>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends enabled through cargo features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
    ) -> Result<Box<dyn InferenceBackend + Send>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(PhotoAiError::config(format!(
                "Backend '{other}' is not available in this build. Rebuild with the '{other}' feature."
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}
