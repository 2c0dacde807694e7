//! Photo job worker CLI
//!
//! Reads job envelopes (one per line on stdin, or a single one from a flag or
//! file), runs them through the dispatcher and writes one result line per job
//! to stdout. Logs go to stderr.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache},
    config::WorkerConfig,
    dispatcher::JobDispatcher,
    download::ModelDownloader,
    error::PhotoAiError,
    inference::DefaultBackendFactory,
    job::{JobEnvelope, JobResponse, JobResult},
    registry::ModelRegistry,
    tracing_config::{init_cli_tracing, TracingFormat},
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Serverless photo job worker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "photo-ai-worker")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Run a single job envelope given as JSON and print its result
    #[arg(long, value_name = "JSON", conflicts_with = "input_file")]
    pub test_input: Option<String>,

    /// Run a single job envelope read from a file ("-" for stdin)
    #[arg(long, value_name = "PATH")]
    pub input_file: Option<PathBuf>,

    /// Read newline-delimited job envelopes from stdin (default mode)
    #[arg(long)]
    pub serve: bool,

    /// JSON configuration file (also read from PHOTO_AI_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cuda, tract:cpu)
    #[arg(short, long)]
    pub execution_provider: Option<String>,

    /// Inference backend (onnx, tract)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Number of threads (0 = auto-detect optimal threading)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Segmentation model: local .onnx path or hf:<owner>/<repo>/<file>
    #[arg(long, value_name = "SOURCE")]
    pub segmentation_model: Option<String>,

    /// Detection model: local .onnx path or hf:<owner>/<repo>/<file>
    #[arg(long, value_name = "SOURCE")]
    pub detection_model: Option<String>,

    /// Encoding of result images
    #[arg(long, value_enum)]
    pub output_format: Option<CliOutputFormat>,

    /// JPEG quality (1-100)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Reject unknown operation names instead of skipping them
    #[arg(long)]
    pub strict_operations: bool,

    /// Load models on the first job that needs them instead of at startup
    #[arg(long)]
    pub lazy: bool,

    /// Download the configured models into the cache and exit
    #[arg(long)]
    pub download_models: bool,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Remove all cached models and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Console => Self::Console,
            CliLogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Self::Json,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.log_format.into())
        .context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    let cache = match &cli.cache_dir {
        Some(dir) => ModelCache::with_custom_cache_dir(dir),
        None => ModelCache::new(),
    }
    .context("Failed to initialize model cache")?;

    if cli.list_models {
        return list_cached_models(&cache);
    }
    if cli.clear_cache {
        return clear_cache_models(&cache);
    }

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    tracing::info!(
        backend = %config.backend,
        execution_provider = %config.execution_provider,
        segmentation = %config.segmentation.source.display_name(),
        detection = %config.detection.model.source.display_name(),
        "Worker configured"
    );

    if cli.download_models {
        return download_models(&config, cache).await;
    }

    let cache = ensure_models_cached(&config, cache).await;
    let registry = ModelRegistry::from_config(&config, Arc::new(DefaultBackendFactory), cache);
    if !cli.lazy {
        if let Err(e) = registry.preload() {
            tracing::warn!(
                error = %e,
                "Model preload failed; jobs needing the model will retry the load"
            );
        }
    }
    let dispatcher = JobDispatcher::new(&registry, &config);

    if let Some(json) = &cli.test_input {
        return print_single_job(&dispatcher, json);
    }
    if let Some(path) = &cli.input_file {
        let json = read_input_file(path)?;
        return print_single_job(&dispatcher, &json);
    }

    serve(&dispatcher, io::stdin().lock(), io::stdout().lock())
}

/// Parse an envelope and run it, turning malformed JSON into a failed result
pub(crate) fn run_envelope(dispatcher: &JobDispatcher<'_>, json: &str) -> JobResponse {
    match serde_json::from_str::<JobEnvelope>(json) {
        Ok(envelope) => {
            let id = envelope
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let span = tracing::info_span!("envelope", job_id = %id);
            let _enter = span.enter();
            JobResponse {
                output: dispatcher.handle(&envelope.input),
                id,
            }
        },
        Err(e) => {
            let error = PhotoAiError::input(format!("Invalid job JSON: {e}"));
            tracing::warn!(error = %error, "Rejected job envelope");
            JobResponse {
                id: uuid::Uuid::new_v4().to_string(),
                output: JobResult::failure(&error),
            }
        },
    }
}

/// Worker loop: one envelope per input line, one response per output line
pub(crate) fn serve<R: BufRead, W: Write>(
    dispatcher: &JobDispatcher<'_>,
    input: R,
    mut output: W,
) -> Result<()> {
    tracing::info!("Waiting for jobs on stdin");
    let mut processed = 0usize;

    for line in input.lines() {
        let line = line.context("Failed to read job from stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let response = run_envelope(dispatcher, &line);
        serde_json::to_writer(&mut output, &response).context("Failed to serialize result")?;
        output.write_all(b"\n").context("Failed to write result")?;
        output.flush().context("Failed to flush result")?;
        processed += 1;
    }

    tracing::info!(jobs = processed, "Input closed, worker exiting");
    Ok(())
}

fn print_single_job(dispatcher: &JobDispatcher<'_>, json: &str) -> Result<()> {
    let response = run_envelope(dispatcher, json);
    let rendered =
        serde_json::to_string_pretty(&response).context("Failed to serialize result")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{rendered}").context("Failed to write result")?;
    Ok(())
}

fn read_input_file(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read job from stdin")?;
        return Ok(buffer);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))
}

/// Download configured models missing from the cache before the first load
///
/// Failures are logged only; jobs needing the model report the load error.
async fn ensure_models_cached(config: &WorkerConfig, cache: ModelCache) -> ModelCache {
    let downloader = match ModelDownloader::new(cache.clone()) {
        Ok(downloader) => downloader,
        Err(e) => {
            tracing::warn!(error = %e, "Model auto-download unavailable");
            return cache;
        },
    };
    let sources = [&config.segmentation.source, &config.detection.model.source];
    match downloader.ensure_cached(&sources, false).await {
        Ok(0) => {},
        Ok(count) => tracing::info!(models = count, "Downloaded missing models"),
        Err(e) => tracing::warn!(error = %e, "Model auto-download failed"),
    }
    cache
}

async fn download_models(config: &WorkerConfig, cache: ModelCache) -> Result<()> {
    let downloader = ModelDownloader::new(cache).context("Failed to create downloader")?;
    for (role, source) in [
        ("segmentation", &config.segmentation.source),
        ("detection", &config.detection.model.source),
    ] {
        let path = downloader
            .fetch(source, true)
            .await
            .with_context(|| format!("Failed to fetch {role} model {}", source.display_name()))?;
        println!("{role}: {}", path.display());
    }
    Ok(())
}

fn show_provider_diagnostics() {
    println!("Backend and Execution Provider Diagnostics");
    println!("==========================================");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected");

    println!("\nExecution Providers:");
    for provider_info in ExecutionProviderManager::list_all_providers() {
        let status = if provider_info.available {
            "available"
        } else {
            "not available"
        };
        println!(
            "  - {}: {} - {}",
            provider_info.name, status, provider_info.description
        );
    }

    println!("\nUsage Examples:");
    println!("  --execution-provider onnx:auto    # Auto-select best ONNX provider (default)");
    println!("  --execution-provider onnx:cuda    # Use NVIDIA CUDA");
    println!("  --execution-provider onnx:cpu     # Force ONNX CPU execution");
    println!("  --execution-provider tract:cpu    # Use pure Rust Tract backend");
}

fn list_cached_models(cache: &ModelCache) -> Result<()> {
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("Cache directory: {}", cache.cache_dir().display());
    if models.is_empty() {
        println!("No cached models found. Run with --download-models to fetch them.");
        return Ok(());
    }

    for model in models {
        println!(
            "  - {} ({}): {}",
            model.model_id,
            format_size(model.size_bytes),
            model.onnx_files.join(", ")
        );
    }
    Ok(())
}

fn clear_cache_models(cache: &ModelCache) -> Result<()> {
    let removed = cache
        .clear_all_models()
        .context("Failed to clear model cache")?;
    if removed.is_empty() {
        println!("No cached models to remove.");
    } else {
        for model_id in removed {
            println!("Removed {model_id}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, ObjectDetector};
    use crate::segmentation::Segmenter;
    use image::{DynamicImage, GrayImage, RgbImage};

    struct NullSegmenter;

    impl Segmenter for NullSegmenter {
        fn segment(&mut self, image: &DynamicImage) -> crate::Result<GrayImage> {
            Ok(GrayImage::new(image.width(), image.height()))
        }
    }

    struct NullDetector;

    impl ObjectDetector for NullDetector {
        fn detect(&mut self, _image: &DynamicImage) -> crate::Result<Vec<Detection>> {
            Ok(Vec::new())
        }
    }

    fn png_base64() -> String {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        crate::codec::encode_image(&image, crate::config::OutputFormat::Png, 95).unwrap()
    }

    #[test]
    fn test_cli_parses_worker_flags() {
        let cli = Cli::parse_from([
            "photo-ai-worker",
            "--serve",
            "--lazy",
            "-vv",
            "--execution-provider",
            "onnx:cuda",
        ]);
        assert!(cli.serve);
        assert!(cli.lazy);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.execution_provider.as_deref(), Some("onnx:cuda"));
    }

    #[test]
    fn test_serve_writes_one_line_per_job() {
        let registry = ModelRegistry::with_models(Box::new(NullSegmenter), Box::new(NullDetector));
        let config = WorkerConfig::default();
        let dispatcher = JobDispatcher::new(&registry, &config);

        let input = format!(
            "{{\"id\":\"a\",\"input\":{{\"image\":\"{}\"}}}}\n\nnot json\n{{\"input\":{{}}}}\n",
            png_base64()
        );
        let mut output = Vec::new();
        serve(&dispatcher, input.as_bytes(), &mut output).unwrap();

        let lines: Vec<JobResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].id, "a");
        assert!(lines[0].output.success);
        assert_eq!(lines[1].output.error_kind.as_deref(), Some("input"));
        assert_eq!(lines[2].output.error.as_deref(), Some("No image provided"));
        assert!(!lines[2].id.is_empty());
    }
}
