//! Remote sources for extensions and binary assets.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Shallow-clones extension repositories.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Clone `url` into `destination`, which must not exist yet.
    async fn clone_shallow(&self, url: &str, destination: &Path) -> Result<()>;
}

/// Fetches one remote file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` to `destination`. On success the file is complete; on
    /// failure nothing is left at `destination`.
    async fn download(&self, url: &str, destination: &Path) -> Result<()>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}
