//! Test utilities and mock backends
//!
//! [`MockBackend`] implements `InferenceBackend` with canned outputs so the
//! segmentation and detection pipelines can be tested without model files or
//! ONNX Runtime.

use crate::{
    error::{PhotoAiError, Result},
    inference::{InferenceBackend, SessionOptions},
};
use instant::Duration;
use ndarray::{Array4, ArrayD, IxDyn};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum MockOutput {
    Fixed(ArrayD<f32>),
    Circle { width: usize, height: usize },
}

/// Mock inference backend for testing
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    output: MockOutput,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    fn with_output(output: MockOutput) -> Self {
        Self {
            initialized: false,
            output,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    /// Backend returning a tensor of `shape` filled with `value`
    pub fn constant(shape: Vec<usize>, value: f32) -> Self {
        Self::with_output(MockOutput::Fixed(ArrayD::from_elem(IxDyn(&shape), value)))
    }

    /// Backend returning the given tensor for every call
    pub fn fixed(output: ArrayD<f32>) -> Self {
        Self::with_output(MockOutput::Fixed(output))
    }

    /// Backend returning a `[1, 1, height, width]` mask with a filled centred circle
    pub fn circle(width: usize, height: usize) -> Self {
        Self::with_output(MockOutput::Circle { width, height })
    }

    /// Mark the backend as already initialized
    pub fn initialized(mut self) -> Self {
        self.initialized = true;
        self
    }

    /// Fail every `initialize` call
    pub fn failing_init(mut self) -> Self {
        self.should_fail_init = true;
        self
    }

    /// Fail every `infer` call
    pub fn failing_inference(mut self) -> Self {
        self.should_fail_inference = true;
        self
    }

    /// Shared handle to the recorded calls
    pub fn call_history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn generate_output(&self) -> ArrayD<f32> {
        match &self.output {
            MockOutput::Fixed(output) => output.clone(),
            MockOutput::Circle { width, height } => {
                let center_x = *width as f32 / 2.0;
                let center_y = *height as f32 / 2.0;
                let radius = (*width).min(*height) as f32 / 3.0;
                ArrayD::from_shape_fn(IxDyn(&[1, 1, *height, *width]), |index| {
                    let dx = index[3] as f32 + 0.5 - center_x;
                    let dy = index[2] as f32 + 0.5 - center_y;
                    if (dx * dx + dy * dy).sqrt() < radius {
                        1.0
                    } else {
                        0.0
                    }
                })
            },
        }
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _options: &SessionOptions) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(PhotoAiError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(10)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(PhotoAiError::model("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(PhotoAiError::model("Mock backend inference failed"));
        }
        if input.shape()[1] != 3 {
            return Err(PhotoAiError::model("Input tensor must have 3 channels"));
        }

        Ok(self.generate_output())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionProvider;
    use std::path::PathBuf;

    fn options() -> SessionOptions {
        SessionOptions {
            model_path: PathBuf::from("mock.onnx"),
            input_shape: [1, 3, 8, 8],
            execution_provider: ExecutionProvider::Cpu,
            intra_threads: 0,
            inter_threads: 0,
        }
    }

    #[test]
    fn test_call_history_records_calls() {
        let mut backend = MockBackend::circle(8, 8);
        let history = backend.call_history();

        backend.initialize(&options()).unwrap();
        backend.infer(&Array4::zeros((1, 3, 8, 8))).unwrap();

        assert_eq!(
            *history.lock().unwrap(),
            vec!["initialize".to_string(), "infer".to_string()]
        );
    }

    #[test]
    fn test_failure_modes() {
        let mut backend = MockBackend::circle(8, 8).failing_init();
        assert!(backend.initialize(&options()).is_err());
        assert!(!backend.is_initialized());

        let mut backend = MockBackend::circle(8, 8).initialized().failing_inference();
        assert!(backend.infer(&Array4::zeros((1, 3, 8, 8))).is_err());
    }

    #[test]
    fn test_circle_output_values() {
        let mut backend = MockBackend::circle(9, 9).initialized();
        let output = backend.infer(&Array4::zeros((1, 3, 9, 9))).unwrap();
        assert_eq!(output.shape(), &[1, 1, 9, 9]);
        assert_eq!(output[[0, 0, 4, 4]], 1.0);
        assert_eq!(output[[0, 0, 0, 0]], 0.0);
    }
}
