//! Payload download.
//!
//! The [`Downloader`] only fetches bytes; writing them into the download
//! directory is [`store_payload`]'s job so the dispatcher owns all local
//! filesystem effects.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Trait that every download transport implements.
pub trait Downloader {
    /// Fetch the payload at `url`.  Any error counts as a failed dispatch.
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP GET.  Non-2xx responses are errors.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("downloading {url}"))?
            .bytes()?;
        Ok(bytes.to_vec())
    }
}

/// Write `bytes` to `dir/filename` without leaving a partial file behind.
///
/// Returns the final path.
pub fn store_payload(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    let dest = dir.join(filename);
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.persist(&dest)
        .with_context(|| format!("writing {}", dest.display()))?;
    Ok(dest)
}

/// True if `dir` exists and is a directory.
pub fn is_usable_dir(dir: &Path) -> bool {
    fs::metadata(dir).map(|m| m.is_dir()).unwrap_or(false)
}
