//! Conversion of command-line arguments into a worker configuration

use crate::cli::main_impl::{Cli, CliOutputFormat};
use crate::{
    config::{OutputFormat, WorkerConfig},
    models::ModelSource,
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};

/// Layers CLI flags over the file and environment configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the worker configuration; flags win over every other source
    pub(crate) fn from_cli(cli: &Cli) -> Result<WorkerConfig> {
        let mut config =
            WorkerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

        if let Some(provider) = &cli.execution_provider {
            let (backend, execution_provider) =
                ExecutionProviderManager::parse_provider_string(provider)
                    .with_context(|| format!("Invalid execution provider '{provider}'"))?;
            config.backend = backend;
            config.execution_provider = execution_provider;
        }

        if let Some(backend) = &cli.backend {
            config.backend = backend
                .parse()
                .with_context(|| format!("Invalid backend '{backend}'"))?;
        }

        if cli.threads > 0 {
            config.intra_threads = cli.threads;
            config.inter_threads = (cli.threads / 2).max(1);
        }

        if let Some(source) = &cli.segmentation_model {
            config.segmentation.source = source
                .parse::<ModelSource>()
                .context("Invalid --segmentation-model")?;
        }
        if let Some(source) = &cli.detection_model {
            config.detection.model.source = source
                .parse::<ModelSource>()
                .context("Invalid --detection-model")?;
        }

        if let Some(format) = cli.output_format {
            config.output_format = match format {
                CliOutputFormat::Png => OutputFormat::Png,
                CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            };
        }
        if let Some(quality) = cli.jpeg_quality {
            config.jpeg_quality = quality;
        }
        if cli.strict_operations {
            config.strict_operations = true;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
