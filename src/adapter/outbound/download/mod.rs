//! Binary asset downloaders.
//!
//! Both backends stage into a private directory under the scratch root and
//! only move a file into its final place once it is complete, so "destination
//! exists" always means "fully downloaded". Containers sharing the volume may
//! fetch the same asset at once; neither ever writes or deletes the other's
//! partial file.

mod aria2;
mod http;

pub use aria2::Aria2c;
pub use http::HttpDownloader;

use std::path::Path;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::warn;

use crate::error::Result;
use crate::port::outbound::fetch::Downloader;

/// Scratch file name for a destination; unique per destination path.
#[must_use]
pub fn staging_name(destination: &Path) -> String {
    let flat: String = destination
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{}.part", flat.trim_start_matches('_'))
}

/// Private scratch directory for one download of `destination`.
///
/// Dropping it removes whatever is left inside, which is only ever this
/// download's own partial data.
pub async fn private_staging(root: &Path, destination: &Path) -> Result<TempDir> {
    tokio::fs::create_dir_all(root).await?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("{}.", staging_name(destination)))
        .tempdir_in(root)?;
    Ok(dir)
}

/// Rename `staged` to `destination`, copying when they sit on different
/// filesystems.
pub async fn move_into_place(staged: &Path, destination: &Path) -> Result<()> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;
    if tokio::fs::rename(staged, destination).await.is_ok() {
        return Ok(());
    }
    // The copy lands under a unique name first; the final rename is atomic.
    let partial = partial_beside(destination, parent)?;
    tokio::fs::copy(staged, &partial).await?;
    partial.persist(destination).map_err(|e| e.error)?;
    tokio::fs::remove_file(staged).await?;
    Ok(())
}

fn partial_beside(destination: &Path, parent: &Path) -> Result<tempfile::TempPath> {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".partial")
        .tempfile_in(parent)?;
    Ok(file.into_temp_path())
}

/// `aria2c` first (when installed), HTTP when it is missing or fails.
#[derive(Debug, Clone)]
pub struct FallbackDownloader {
    primary: Option<Aria2c>,
    fallback: HttpDownloader,
}

impl FallbackDownloader {
    #[must_use]
    pub fn new(primary: Option<Aria2c>, fallback: HttpDownloader) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Downloader for FallbackDownloader {
    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        if let Some(primary) = &self.primary {
            match primary.download(url, destination).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(url, error = %e, "aria2c failed, retrying over HTTP"),
            }
        }
        self.fallback.download(url, destination).await
    }

    fn name(&self) -> &'static str {
        if self.primary.is_some() {
            "aria2c+http"
        } else {
            "http"
        }
    }
}
