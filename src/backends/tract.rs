//! Tract backend implementation
//!
//! Pure Rust inference through Tract: no C++ runtime, CPU only. The model
//! input fact is pinned to the configured NCHW shape so the graph can be
//! fully optimized ahead of the first job.

use crate::error::{PhotoAiError, Result};
use crate::inference::{InferenceBackend, SessionOptions};
use crate::models::model_file_size;
use ndarray::{Array4, ArrayD, IxDyn};
use tract_onnx::prelude::*;

use instant::{Duration, Instant};

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running one model using pure Rust inference
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
    input_shape: [usize; 4],
    initialized: bool,
}

impl TractBackend {
    /// Tract only ever runs on the CPU
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    /// Create a new uninitialized Tract backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and initialize the model using Tract
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

        #[allow(clippy::cast_precision_loss)]
        let size_mb = model_file_size(model_path) as f64 / (1024.0 * 1024.0);
        log::info!("Initializing Tract backend");
        log::info!("  - Model: {} ({size_mb:.2} MB)", model_path.display());
        log::info!("  - Input shape: {:?}", options.input_shape);

        let model = onnx()
            .model_for_path(model_path)
            .map_err(|e| PhotoAiError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact(options.input_shape).into())
            .map_err(|e| PhotoAiError::model(format!("Failed to pin input shape: {e}")))?
            .into_optimized()
            .map_err(|e| PhotoAiError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| PhotoAiError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);
        self.input_shape = options.input_shape;
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, options: &SessionOptions) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.load_model(options).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PhotoAiError::model("Tract model not initialized"))?;

        let shape = input.shape().to_vec();
        if shape != self.input_shape {
            return Err(PhotoAiError::model(format!(
                "Input tensor shape {:?} does not match model input {:?}",
                shape, self.input_shape
            )));
        }

        let inference_start = Instant::now();
        let data: Vec<f32> = input.iter().copied().collect();
        let input_tensor = Tensor::from_shape(&shape, &data)
            .map_err(|e| PhotoAiError::model(format!("Failed to build input tensor: {e}")))?;

        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| PhotoAiError::model(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| PhotoAiError::model("No output tensor found"))?;

        let output_view = output_tensor
            .to_array_view::<f32>()
            .map_err(|e| PhotoAiError::model(format!("Failed to convert output tensor: {e}")))?;
        let output_shape = output_view.shape().to_vec();
        let output_data: Vec<f32> = output_view.iter().copied().collect();
        let output = ArrayD::from_shape_vec(IxDyn(&output_shape), output_data)
            .map_err(|e| PhotoAiError::model(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Tract inference completed in {}ms, output shape {:?}",
            inference_start.elapsed().as_millis(),
            output.shape()
        );
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
