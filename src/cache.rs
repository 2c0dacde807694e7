//! Model cache management for downloaded models
//!
//! Downloaded model files live in an XDG-compliant cache directory, one
//! sub-directory per `HuggingFace` repository (`owner--repo`), with the
//! repository-relative file path preserved underneath.

use crate::error::{PhotoAiError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache location
pub const CACHE_DIR_ENV: &str = "PHOTO_AI_CACHE_DIR";

/// Information about a cached model repository
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from the repository name)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// ONNX files found in the directory, relative to it
    pub onnx_files: Vec<String>,
    /// Size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a new model cache manager
    ///
    /// Cache location:
    /// - `$PHOTO_AI_CACHE_DIR/models/` when the variable is set
    /// - Linux/macOS: `~/.cache/photo-ai-worker/models/`
    /// - Windows: `%LOCALAPPDATA%/photo-ai-worker/models/`
    ///
    /// # Errors
    /// - Failed to determine cache directory
    /// - Failed to create cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::get_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Create a model cache rooted at a custom directory
    ///
    /// # Errors
    /// - Failed to create cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| PhotoAiError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                PhotoAiError::config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("photo-ai-worker")
            .join("models"))
    }

    /// Convert a repository name like `briaai/RMBG-1.4` into a cache-safe id
    ///
    /// ```
    /// use photo_ai_worker::cache::ModelCache;
    ///
    /// assert_eq!(ModelCache::repo_to_model_id("briaai/RMBG-1.4"), "briaai--RMBG-1.4");
    /// ```
    #[must_use]
    pub fn repo_to_model_id(repo: &str) -> String {
        repo.trim_matches('/').replace('/', "--")
    }

    /// Root directory of the cache
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory holding all files of one repository
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// Local path of a repository file (may not exist)
    #[must_use]
    pub fn model_file_path(&self, repo: &str, file: &str) -> PathBuf {
        self.get_model_path(&Self::repo_to_model_id(repo))
            .join(file.trim_start_matches('/'))
    }

    /// Check whether a repository file has already been downloaded
    #[must_use]
    pub fn is_file_cached(&self, repo: &str, file: &str) -> bool {
        self.model_file_path(repo, file).is_file()
    }

    /// Scan the cache directory and return every cached repository
    ///
    /// # Errors
    /// - Failed to read cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            PhotoAiError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                PhotoAiError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let model_id = entry.file_name().to_string_lossy().into_owned();
            let mut onnx_files = Vec::new();
            let mut size_bytes = 0;
            Self::visit_dir(&path, &path, &mut onnx_files, &mut size_bytes)
                .map_err(|e| PhotoAiError::file_io_error("scan model directory", &path, &e))?;

            if onnx_files.is_empty() {
                log::debug!("Skipping model directory without ONNX files: {}", path.display());
                continue;
            }

            onnx_files.sort();
            models.push(CachedModelInfo {
                model_id,
                path,
                onnx_files,
                size_bytes,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    fn visit_dir(
        root: &Path,
        dir: &Path,
        onnx_files: &mut Vec<String>,
        total: &mut u64,
    ) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::visit_dir(root, &path, onnx_files, total)?;
            } else {
                *total += entry.metadata()?.len();
                if path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
                {
                    if let Ok(relative) = path.strip_prefix(root) {
                        onnx_files.push(relative.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Clear all cached models
    ///
    /// # Errors
    /// - Failed to access or remove cache entries
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed_models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(removed_models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            PhotoAiError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let model_id = entry.file_name().to_string_lossy().into_owned();
                log::info!("Removing cached model: {}", model_id);
                fs::remove_dir_all(&path).map_err(|e| {
                    PhotoAiError::file_io_error("remove cached model directory", &path, &e)
                })?;
                removed_models.push(model_id);
            }
        }

        removed_models.sort();
        Ok(removed_models)
    }
}

/// Format a byte count for display
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", size, UNITS.get(unit).copied().unwrap_or("GB"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_repo_to_model_id() {
        assert_eq!(ModelCache::repo_to_model_id("briaai/RMBG-1.4"), "briaai--RMBG-1.4");
        assert_eq!(ModelCache::repo_to_model_id("/owner/repo/"), "owner--repo");
    }

    #[test]
    fn test_model_file_path_layout() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let path = cache.model_file_path("briaai/RMBG-1.4", "onnx/model.onnx");
        assert!(path.ends_with("models/briaai--RMBG-1.4/onnx/model.onnx"));
        assert!(!cache.is_file_cached("briaai/RMBG-1.4", "onnx/model.onnx"));
    }

    #[test]
    fn test_scan_and_clear() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();

        let model_file = cache.model_file_path("briaai/RMBG-1.4", "onnx/model.onnx");
        fs::create_dir_all(model_file.parent().unwrap()).unwrap();
        fs::write(&model_file, vec![0u8; 2048]).unwrap();

        // Directory without any ONNX file is not reported
        fs::create_dir_all(cache.get_model_path("empty--repo")).unwrap();

        let models = cache.scan_cached_models().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_id, "briaai--RMBG-1.4");
        assert_eq!(models[0].onnx_files, vec!["onnx/model.onnx".to_string()]);
        assert_eq!(models[0].size_bytes, 2048);
        assert!(cache.is_file_cached("briaai/RMBG-1.4", "onnx/model.onnx"));

        let removed = cache.clear_all_models().unwrap();
        assert_eq!(removed, vec!["briaai--RMBG-1.4".to_string(), "empty--repo".to_string()]);
        assert!(cache.scan_cached_models().unwrap().is_empty());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
