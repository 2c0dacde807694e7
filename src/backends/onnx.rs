//! ONNX Runtime backend implementation
//!
//! Runs the segmentation and detection graphs through ONNX Runtime with
//! CUDA / `CoreML` execution providers when available, falling back to CPU.

use crate::config::ExecutionProvider;
use crate::error::{PhotoAiError, Result};
use crate::inference::{InferenceBackend, SessionOptions};
use crate::models::model_file_size;
use ndarray::{Array4, ArrayD};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;

use instant::{Duration, Instant};

/// ONNX Runtime backend for running one model
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
    initialized: bool,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers with availability status and descriptions
    ///
    /// ```rust,no_run
    /// use photo_ai_worker::backends::OnnxBackend;
    ///
    /// for (name, available, description) in OnnxBackend::list_providers() {
    ///     println!("{}: {} - {}", name, if available { "yes" } else { "no" }, description);
    /// }
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!("Platform: {} ({})", std::env::consts::OS, std::env::consts::ARCH);

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Create a new uninitialized ONNX backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cuda_provider() -> Option<ExecutionProviderDispatch> {
        let cuda_provider = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
            Some(cuda_provider.build())
        } else {
            None
        }
    }

    fn coreml_provider() -> Option<ExecutionProviderDispatch> {
        let coreml_provider = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
            Some(CoreMLExecutionProvider::default().with_subgraphs(true).build())
        } else {
            None
        }
    }

    fn configure_providers(
        session_builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let providers: Vec<ExecutionProviderDispatch> = match provider {
            ExecutionProvider::Auto => {
                let providers: Vec<_> = [Self::cuda_provider(), Self::coreml_provider()]
                    .into_iter()
                    .flatten()
                    .collect();
                if providers.is_empty() {
                    log::warn!("No hardware acceleration available, falling back to CPU");
                }
                providers
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Cuda => Self::cuda_provider().into_iter().collect(),
            ExecutionProvider::CoreMl => Self::coreml_provider().into_iter().collect(),
        };

        if providers.is_empty() {
            if matches!(provider, ExecutionProvider::Cuda | ExecutionProvider::CoreMl) {
                log::warn!(
                    "{provider} execution provider requested but not available, falling back to CPU"
                );
            }
            return Ok(session_builder);
        }

        log::info!(
            "Hardware acceleration enabled with {count} provider(s)",
            count = providers.len()
        );
        session_builder
            .with_execution_providers(providers)
            .map_err(|e| {
                PhotoAiError::model(format!("Failed to set {provider} execution providers: {e}"))
            })
    }

    /// Load and initialize the ONNX model
    fn load_model(&mut self, options: &SessionOptions) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_path = &options.model_path;

        if !model_path.is_file() {
            return Err(PhotoAiError::model_error_with_context(
                "load",
                model_path,
                "file not found",
                &["run `photo-ai-worker --download-models`", "check the configured model path"],
            ));
        }

        let session_builder = Session::builder()
            .map_err(|e| PhotoAiError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PhotoAiError::model(format!("Failed to set optimization level: {e}")))?;

        let session_builder = Self::configure_providers(session_builder, options.execution_provider)?;

        let available = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if options.intra_threads > 0 {
            options.intra_threads
        } else {
            available
        };
        let inter_threads = if options.inter_threads > 0 {
            options.inter_threads
        } else {
            (available / 4).max(1)
        };

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| PhotoAiError::model(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| PhotoAiError::model(format!("Failed to set inter threads: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                PhotoAiError::model_error_with_context(
                    "create session for",
                    model_path,
                    &e.to_string(),
                    &["verify the file is a valid ONNX graph"],
                )
            })?;

        #[allow(clippy::cast_precision_loss)]
        let size_mb = model_file_size(model_path) as f64 / (1024.0 * 1024.0);
        log::debug!("ONNX Runtime session created");
        log::debug!("  - Model: {} ({size_mb:.2} MB)", model_path.display());
        log::debug!("  - Requested provider: {}", options.execution_provider);
        log::debug!(
            "  - Threading: {intra_threads} intra-op threads, {inter_threads} inter-op threads"
        );

        self.session = Some(session);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Model loading complete: {} in {:.0}ms",
            model_path.display(),
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, options: &SessionOptions) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.load_model(options).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        if !self.initialized {
            return Err(PhotoAiError::model("ONNX backend not initialized"));
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| PhotoAiError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("Starting ONNX inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| PhotoAiError::model(format!("Failed to convert input tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| PhotoAiError::model(format!("ONNX inference failed: {e}")))?;

        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| PhotoAiError::model("No output tensors found"))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| PhotoAiError::model("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| PhotoAiError::model(format!("Failed to extract output tensor: {e}")))?
            .to_owned();

        log::debug!(
            "ONNX inference complete: {:.2}ms, output shape {:?}",
            inference_start.elapsed().as_secs_f64() * 1000.0,
            output.shape()
        );
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}
