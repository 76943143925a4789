//! Input location resolution and FITS download with a local cache.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

/// Where a Stokes plane comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Local(PathBuf),
    Remote(String),
}

impl DataSource {
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            DataSource::Remote(s.to_string())
        } else {
            DataSource::Local(PathBuf::from(s))
        }
    }
}

/// Cache file name for `url`: its last non-empty path segment, without query or fragment.
fn cache_key(url: &str) -> Result<String> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme.split(['?', '#']).next().unwrap_or_default();
    match path.split_once('/') {
        Some((_, tail)) => match tail.rsplit('/').find(|s| !s.is_empty()) {
            Some(name) => Ok(name.to_string()),
            None => bail!("URL has no file name: {}", url),
        },
        None => bail!("URL has no file name: {}", url),
    }
}

/// FITS downloader caching files by name.
#[derive(Debug)]
pub struct FitsFetcher {
    cache_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl FitsFetcher {
    /// Fetcher using `<user cache>/stokesmap/fits`.
    pub fn new() -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("stokesmap")
            .join("fits");

        Self::with_cache_dir(cache_dir)
    }

    pub fn with_cache_dir(cache_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { cache_dir, client })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn is_cached(&self, key: &str) -> Option<PathBuf> {
        let path = self.cache_dir.join(key);
        if path.exists() { Some(path) } else { None }
    }

    /// Download `url` into the cache unless a file of the same name is there already.
    pub fn fetch(&self, url: &str) -> Result<PathBuf> {
        let key = cache_key(url)?;
        if let Some(path) = self.is_cached(&key) {
            debug!("Using cached FITS file: {}", path.display());
            return Ok(path);
        }

        info!("Downloading {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to download {}", url))?;

        if !response.status().is_success() {
            bail!("Download failed: {} for URL {}", response.status(), url);
        }

        let data = response.bytes().context("Failed to read response")?;

        // Write under a temporary name so an interrupted download is never reused.
        let cache_path = self.cache_dir.join(&key);
        let partial = self.cache_dir.join(format!("{}.part", key));
        let mut file = File::create(&partial).context("Failed to create cache file")?;
        file.write_all(&data).context("Failed to write cache file")?;
        drop(file);
        fs::rename(&partial, &cache_path).context("Failed to finalize cache file")?;

        info!("Cached {} ({} bytes)", cache_path.display(), data.len());
        Ok(cache_path)
    }

    /// Local path for `source`, downloading remote inputs.
    pub fn resolve(&self, source: &DataSource) -> Result<PathBuf> {
        match source {
            DataSource::Local(path) => {
                if !path.exists() {
                    bail!("Input file not found: {}", path.display());
                }
                Ok(path.clone())
            }
            DataSource::Remote(url) => self.fetch(url),
        }
    }
}
