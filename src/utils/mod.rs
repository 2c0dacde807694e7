//! Shared utilities for preprocessing and provider management

pub mod preprocessing;
pub mod providers;

pub use preprocessing::{CoordinateTransformation, ImagePreprocessor};
pub use providers::{ExecutionProviderManager, ProviderInfo};
