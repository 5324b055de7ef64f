//! Model asset resolution: local file, cache, or HTTPS download.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
    #[error("cannot derive a file name from {0}")]
    BadUrl(String),
}

/// Where a model asset comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A file that must already exist.
    Path(PathBuf),
    /// An HTTPS asset, cached under its last path segment.
    Url(String),
}

/// Resolve a model to a local path.
///
/// Local paths are used as-is. URLs are looked up in `cache_dir` (or the
/// platform cache directory) first and downloaded there on a miss.
pub fn resolve(source: &ModelSource, cache_dir: Option<&Path>) -> Result<PathBuf, ModelResolveError> {
    match source {
        ModelSource::Path(path) => {
            if path.exists() {
                Ok(path.clone())
            } else {
                Err(ModelResolveError::NotFound(path.clone()))
            }
        }
        ModelSource::Url(url) => {
            let name = file_name_from_url(url)?;
            let cache_dir = match cache_dir {
                Some(dir) => dir.to_path_buf(),
                None => model_cache_dir()?,
            };
            let cached_path = cache_dir.join(name);
            if cached_path.exists() {
                tracing::debug!(path = %cached_path.display(), "model cache hit");
                return Ok(cached_path);
            }

            fs::create_dir_all(&cache_dir).map_err(ModelResolveError::CacheDir)?;
            tracing::info!(url, dest = %cached_path.display(), "downloading model");
            download(url, &cached_path)?;
            Ok(cached_path)
        }
    }
}

/// Platform cache directory for downloaded models.
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    dirs::cache_dir()
        .map(|d| d.join("facemark").join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

fn file_name_from_url(url: &str) -> Result<&str, ModelResolveError> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && path.contains('/') => Ok(name),
        _ => Err(ModelResolveError::BadUrl(url.to_string())),
    }
}

fn download(url: &str, dest: &Path) -> Result<(), ModelResolveError> {
    let download_err = |source| ModelResolveError::Download {
        url: url.to_string(),
        source,
    };

    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;
    let bytes = response.bytes().map_err(download_err)?;

    // Write to a temp file first, then rename for atomicity
    let temp_path = dest.with_extension("part");
    let write_err = |source| ModelResolveError::Write {
        path: temp_path.clone(),
        source,
    };
    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(&bytes).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, dest).map_err(|source| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source,
    })?;

    tracing::info!(bytes = bytes.len(), path = %dest.display(), "model downloaded");
    Ok(())
}
