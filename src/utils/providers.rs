//! Execution provider parsing and listing

use crate::{
    config::{BackendType, ExecutionProvider},
    error::{PhotoAiError, Result},
};

/// Information about a backend/provider combination
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Utility for parsing and listing execution providers
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse a provider string in `backend:provider` form
    ///
    /// A bare backend name selects its default provider.
    ///
    /// ```rust
    /// use photo_ai_worker::utils::ExecutionProviderManager;
    /// use photo_ai_worker::{BackendType, ExecutionProvider};
    ///
    /// let (backend, provider) = ExecutionProviderManager::parse_provider_string("onnx:cuda").unwrap();
    /// assert_eq!(backend, BackendType::Onnx);
    /// assert_eq!(provider, ExecutionProvider::Cuda);
    /// ```
    ///
    /// # Errors
    /// - Unknown backend or provider name
    /// - Provider not supported by the backend
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let (backend, provider) = match provider_str.split_once(':') {
            Some((backend, provider)) => (backend.parse::<BackendType>()?, Some(provider)),
            None => (provider_str.parse::<BackendType>()?, None),
        };

        match (backend, provider) {
            (BackendType::Onnx, None) => Ok((backend, ExecutionProvider::Auto)),
            (BackendType::Onnx, Some(provider)) => Ok((backend, provider.parse()?)),
            (BackendType::Tract, None | Some("cpu")) => Ok((backend, ExecutionProvider::Cpu)),
            (BackendType::Tract, Some(provider)) => Err(PhotoAiError::config(format!(
                "Unknown Tract provider: {provider}. Tract only supports 'cpu'"
            ))),
        }
    }

    /// All backend/provider combinations compiled into this build with availability
    #[must_use]
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        #[cfg(feature = "onnx")]
        {
            let onnx_providers = crate::backends::OnnxBackend::list_providers();
            let any_available = onnx_providers.iter().any(|(_, available, _)| *available);
            providers.push(ProviderInfo {
                name: "onnx:auto".to_string(),
                backend_type: BackendType::Onnx,
                execution_provider: ExecutionProvider::Auto,
                available: any_available,
                description: "ONNX Runtime with auto-selected provider".to_string(),
            });
            for (name, available, description) in onnx_providers {
                let lower = name.to_lowercase();
                let Ok(execution_provider) = lower.parse::<ExecutionProvider>() else {
                    continue;
                };
                providers.push(ProviderInfo {
                    name: format!("onnx:{lower}"),
                    backend_type: BackendType::Onnx,
                    execution_provider,
                    available,
                    description,
                });
            }
        }

        #[cfg(feature = "tract")]
        {
            for (_, available, description) in crate::backends::TractBackend::list_providers() {
                providers.push(ProviderInfo {
                    name: "tract:cpu".to_string(),
                    backend_type: BackendType::Tract,
                    execution_provider: ExecutionProvider::Cpu,
                    available,
                    description,
                });
            }
        }

        providers
    }
}
