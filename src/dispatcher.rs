//! Job dispatch
//!
//! Runs a job's operations in order, each one consuming the previous output,
//! and collects every intermediate image into the result.

use crate::{
    background::{remove_background, BackgroundOption},
    codec,
    config::WorkerConfig,
    enhance::enhance,
    error::{PhotoAiError, Result},
    job::{JobRequest, JobResult, Operation},
    plates::{blur_plates, normalize_blur_strength},
    registry::ModelRegistry,
};
use image::DynamicImage;
use instant::Instant;
use std::collections::BTreeMap;

/// Encoded images produced by a successful job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    /// Output of each operation that ran, keyed by its output key
    pub images: BTreeMap<String, String>,
    /// Last operation's output, or the decoded input if none ran
    pub final_image: String,
}

/// Executes jobs against a model registry
#[derive(Debug, Clone, Copy)]
pub struct JobDispatcher<'a> {
    registry: &'a ModelRegistry,
    config: &'a WorkerConfig,
}

impl<'a> JobDispatcher<'a> {
    #[must_use]
    pub fn new(registry: &'a ModelRegistry, config: &'a WorkerConfig) -> Self {
        Self { registry, config }
    }

    /// Run a job, converting any failure into a structured result
    #[must_use]
    pub fn handle(&self, request: &JobRequest) -> JobResult {
        match self.run(request) {
            Ok(output) => JobResult::success(output.images, output.final_image),
            Err(e) => {
                tracing::warn!(error_kind = %e.kind(), error = %e, "Job failed");
                JobResult::failure(&e)
            },
        }
    }

    /// Run a job
    ///
    /// # Errors
    /// - `Input`: no image, or an unknown operation in strict mode
    /// - `Decode`: malformed image or background image
    /// - `Config`: invalid blur strength or background color
    /// - `Model`: model load or inference failure
    pub fn run(&self, request: &JobRequest) -> Result<JobOutput> {
        let payload = request
            .image_payload()
            .ok_or_else(|| PhotoAiError::input("No image provided"))?;

        let names = request.operation_names();
        let span = tracing::info_span!("job", operations = ?names);
        let _enter = span.enter();
        let job_start = Instant::now();

        let operations = self.resolve_operations(&names)?;

        let input = codec::decode_image(payload)?;
        tracing::debug!(width = input.width(), height = input.height(), "Decoded input");

        let mut images = BTreeMap::new();
        let mut current = input;
        for operation in operations {
            let op_start = Instant::now();
            current = self.apply(operation, current, request)?;
            images.insert(operation.output_key().to_string(), self.encode(&current)?);
            tracing::info!(
                operation = %operation,
                elapsed_ms = op_start.elapsed().as_millis() as u64,
                "Operation complete"
            );
        }

        let final_image = self.encode(&current)?;
        tracing::info!(
            outputs = images.len(),
            elapsed_ms = job_start.elapsed().as_millis() as u64,
            "Job complete"
        );
        Ok(JobOutput {
            images,
            final_image,
        })
    }

    fn resolve_operations(&self, names: &[&str]) -> Result<Vec<Operation>> {
        let mut operations = Vec::with_capacity(names.len());
        for name in names {
            match Operation::from_name(name) {
                Some(operation) => operations.push(operation),
                None if self.config.strict_operations => {
                    return Err(PhotoAiError::input(format!("Unknown operation: {name}")));
                },
                None => tracing::warn!(operation = %name, "Skipping unknown operation"),
            }
        }
        Ok(operations)
    }

    fn apply(
        &self,
        operation: Operation,
        image: DynamicImage,
        request: &JobRequest,
    ) -> Result<DynamicImage> {
        match operation {
            Operation::RemoveBackground => {
                let color = request.background_color()?;
                let background = request
                    .background_image
                    .as_deref()
                    .map(codec::decode_image)
                    .transpose()?;
                let option = BackgroundOption::from_parts(color, background);
                let mut segmenter = self.registry.segmenter()?;
                remove_background(&image, &option, &mut **segmenter)
            },
            Operation::BlurPlates => {
                let strength = request
                    .blur_strength
                    .unwrap_or_else(|| i64::from(self.config.default_blur_strength));
                let kernel_size =
                    normalize_blur_strength(strength, self.config.max_blur_strength)?;
                let mut detector = self.registry.detector()?;
                blur_plates(
                    image,
                    i64::from(kernel_size),
                    self.config.max_blur_strength,
                    &mut **detector,
                    &self.config.plate_filter,
                )
            },
            Operation::Enhance => Ok(enhance(image, &self.config.enhance)),
        }
    }

    fn encode(&self, image: &DynamicImage) -> Result<String> {
        codec::encode_image(image, self.config.output_format, self.config.jpeg_quality)
    }
}
