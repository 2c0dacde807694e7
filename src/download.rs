//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a `.part` file next to their cache location,
//! checked against an optional SHA-256 digest and renamed into place, so a
//! cached path is never a partial download.

use crate::cache::ModelCache;
use crate::error::{PhotoAiError, Result};
use crate::models::ModelSource;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Default `HuggingFace` host
pub const HUGGINGFACE_BASE_URL: &str = "https://huggingface.co";

/// Direct download URL of a file in a `HuggingFace` repository
///
/// ```
/// use photo_ai_worker::download::{huggingface_file_url, HUGGINGFACE_BASE_URL};
///
/// assert_eq!(
///     huggingface_file_url(HUGGINGFACE_BASE_URL, "briaai/RMBG-1.4", "onnx/model.onnx"),
///     "https://huggingface.co/briaai/RMBG-1.4/resolve/main/onnx/model.onnx"
/// );
/// ```
#[must_use]
pub fn huggingface_file_url(base_url: &str, repo: &str, file: &str) -> String {
    format!(
        "{}/{}/resolve/main/{}",
        base_url.trim_end_matches('/'),
        repo.trim_matches('/'),
        file.trim_start_matches('/')
    )
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    /// Progress bar on stderr when the `cli` feature is enabled
    #[must_use]
    pub fn for_download() -> Self {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            Self::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            Self::NoOp
        }
    }

    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }
}

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
    base_url: String,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| PhotoAiError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            cache,
            base_url: HUGGINGFACE_BASE_URL.to_string(),
        })
    }

    /// Download from a mirror instead of huggingface.co
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Make a model source available locally and return its path
    ///
    /// External files are only checked for existence. `HuggingFace` files
    /// already in the cache are not downloaded again.
    ///
    /// # Errors
    /// - External file missing
    /// - Network or HTTP errors
    /// - Filesystem errors while writing the cache
    /// - SHA-256 mismatch
    pub async fn fetch(&self, source: &ModelSource, show_progress: bool) -> Result<PathBuf> {
        let (repo, file, sha256) = match source {
            ModelSource::External { .. } => return source.resolve(&self.cache),
            ModelSource::HuggingFace { repo, file, sha256 } => (repo, file, sha256.as_deref()),
        };

        let local_path = self.cache.model_file_path(repo, file);
        if local_path.is_file() {
            log::info!("Model already cached: {}", source.display_name());
            return Ok(local_path);
        }

        let url = huggingface_file_url(&self.base_url, repo, file);
        log::info!("Downloading {} from {url}", source.display_name());

        let progress = show_progress.then(ProgressIndicator::for_download);
        if let Some(pb) = &progress {
            pb.set_message(format!("Downloading {file}"));
        }

        let part_path = partial_path(&local_path);
        let result = async {
            self.download_file(&url, &part_path, progress.as_ref()).await?;
            if !verify_file_integrity(&part_path, sha256)? {
                return Err(PhotoAiError::model(format!(
                    "SHA-256 mismatch for {}",
                    source.display_name()
                )));
            }
            fs::rename(&part_path, &local_path).map_err(|e| {
                PhotoAiError::file_io_error("move downloaded model into cache", &local_path, &e)
            })
        }
        .await;

        match result {
            Ok(()) => {
                if let Some(pb) = progress {
                    pb.finish_with_message(format!("Downloaded {}", source.display_name()));
                }
                log::info!("Cached {} at {}", source.display_name(), local_path.display());
                Ok(local_path)
            },
            Err(e) => {
                if part_path.exists() {
                    if let Err(cleanup_err) = fs::remove_file(&part_path) {
                        log::warn!("Failed to remove partial download: {cleanup_err}");
                    }
                }
                if let Some(pb) = progress {
                    pb.finish_with_message("Download failed".to_string());
                }
                Err(e)
            },
        }
    }

    /// Download every `HuggingFace` source that is not cached yet
    ///
    /// Local files are left for the loader to report. Every source is
    /// attempted even when an earlier one fails; the returned value counts
    /// the files actually downloaded.
    ///
    /// # Errors
    /// - One or more downloads failed; the error lists each of them
    pub async fn ensure_cached(&self, sources: &[&ModelSource], show_progress: bool) -> Result<usize> {
        let mut downloaded = 0;
        let mut failures = Vec::new();

        for source in sources {
            let ModelSource::HuggingFace { repo, file, .. } = source else {
                continue;
            };
            if self.cache.is_file_cached(repo, file) {
                continue;
            }

            log::info!("Model {} not cached, downloading", source.display_name());
            match self.fetch(source, show_progress).await {
                Ok(_) => downloaded += 1,
                Err(e) => failures.push(format!("{}: {e}", source.display_name())),
            }
        }

        if failures.is_empty() {
            Ok(downloaded)
        } else {
            Err(PhotoAiError::model(format!(
                "Failed to download {} model(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Stream a URL into `local_path`
    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PhotoAiError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PhotoAiError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(PhotoAiError::network_error(
                format!("HTTP error for {url}"),
                response.status(),
            ));
        }

        let total_size = response.content_length();
        if let (Some(pb), Some(total)) = (progress, total_size) {
            pb.set_length(total);
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| PhotoAiError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(std::io::Error::other),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| PhotoAiError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| PhotoAiError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            if let Some(pb) = progress {
                pb.set_position(downloaded);
            }
        }

        file.flush()
            .await
            .map_err(|e| PhotoAiError::file_io_error("flush file", local_path, &e))?;

        log::debug!("Downloaded {downloaded} bytes to {}", local_path.display());
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Check a file against an expected hex SHA-256 digest
///
/// Returns `true` when no digest is expected.
///
/// # Errors
/// - File cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = fs::read(file_path)
        .map_err(|e| PhotoAiError::file_io_error("read file for verification", file_path, &e))?;
    let actual_hash = format!("{:x}", Sha256::digest(&contents));

    if actual_hash.eq_ignore_ascii_case(expected.trim()) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {expected}, got {actual_hash}",
            file_path.display()
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // SHA-256 of "hello"
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_huggingface_file_url_normalizes_slashes() {
        assert_eq!(
            huggingface_file_url("https://mirror.example/", "/owner/repo/", "/model.onnx"),
            "https://mirror.example/owner/repo/resolve/main/model.onnx"
        );
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.bin");
        fs::write(&path, b"hello").unwrap();

        assert!(verify_file_integrity(&path, None).unwrap());
        assert!(verify_file_integrity(&path, Some(HELLO_SHA256)).unwrap());
        assert!(verify_file_integrity(&path, Some(&HELLO_SHA256.to_uppercase())).unwrap());
        assert!(!verify_file_integrity(&path, Some("deadbeef")).unwrap());
        assert!(verify_file_integrity(&temp.path().join("missing"), Some(HELLO_SHA256)).is_err());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/cache/owner--repo/onnx/model.onnx")),
            PathBuf::from("/cache/owner--repo/onnx/model.onnx.part")
        );
    }

    #[tokio::test]
    async fn test_fetch_returns_cached_file_without_network() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let cached = cache.model_file_path("owner/repo", "onnx/model.onnx");
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, b"onnx").unwrap();

        let downloader = ModelDownloader::new(cache)
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let source = ModelSource::HuggingFace {
            repo: "owner/repo".to_string(),
            file: "onnx/model.onnx".to_string(),
            sha256: None,
        };
        assert_eq!(downloader.fetch(&source, false).await.unwrap(), cached);
    }

    #[tokio::test]
    async fn test_fetch_external_missing_is_model_error() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();
        let source = ModelSource::External {
            path: temp.path().join("absent.onnx"),
        };
        assert!(matches!(
            downloader.fetch(&source, false).await.unwrap_err(),
            PhotoAiError::Model(_)
        ));
    }

    /// Serve `body` once over plain HTTP and report the requested path
    async fn serve_once(body: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();

            let request = String::from_utf8_lossy(&request).into_owned();
            request
                .split_whitespace()
                .nth(1)
                .unwrap_or_default()
                .to_string()
        });
        (base_url, handle)
    }

    #[tokio::test]
    async fn test_ensure_cached_downloads_missing_model() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let target = cache.model_file_path("owner/repo", "onnx/model.onnx");
        let (base_url, server) = serve_once(b"hello").await;

        let downloader = ModelDownloader::new(cache).unwrap().with_base_url(base_url);
        let source = ModelSource::HuggingFace {
            repo: "owner/repo".to_string(),
            file: "onnx/model.onnx".to_string(),
            sha256: Some(HELLO_SHA256.to_string()),
        };
        let local = ModelSource::External {
            path: temp.path().join("local.onnx"),
        };

        let downloaded = downloader.ensure_cached(&[&source, &local], false).await.unwrap();
        assert_eq!(downloaded, 1);
        assert_eq!(
            server.await.unwrap(),
            "/owner/repo/resolve/main/onnx/model.onnx"
        );
        assert_eq!(fs::read(&target).unwrap(), b"hello");
        assert!(!partial_path(&target).exists());

        // Already cached: no second request
        let downloaded = downloader.ensure_cached(&[&source], false).await.unwrap();
        assert_eq!(downloaded, 0);
    }

    #[tokio::test]
    async fn test_ensure_cached_reports_failures() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let downloader = ModelDownloader::new(cache)
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let first = ModelSource::HuggingFace {
            repo: "owner/first".to_string(),
            file: "model.onnx".to_string(),
            sha256: None,
        };
        let second = ModelSource::HuggingFace {
            repo: "owner/second".to_string(),
            file: "model.onnx".to_string(),
            sha256: None,
        };

        let err = downloader
            .ensure_cached(&[&first, &second], false)
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoAiError::Model(_)));
        let message = err.to_string();
        assert!(message.contains("owner/first") && message.contains("owner/second"));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_cleans_up() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let target = cache.model_file_path("owner/repo", "model.onnx");
        let downloader = ModelDownloader::new(cache)
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let source = ModelSource::HuggingFace {
            repo: "owner/repo".to_string(),
            file: "model.onnx".to_string(),
            sha256: None,
        };

        assert!(downloader.fetch(&source, false).await.is_err());
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }
}
