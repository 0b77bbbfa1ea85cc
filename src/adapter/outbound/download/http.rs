//! Streaming HTTP downloads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;

use super::{move_into_place, private_staging, staging_name};
use crate::error::Result;
use crate::port::outbound::fetch::Downloader;

#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    staging_dir: PathBuf,
}

impl HttpDownloader {
    #[must_use]
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self::with_client(Client::new(), staging_dir)
    }

    #[must_use]
    pub fn with_client(client: Client, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            staging_dir: staging_dir.into(),
        }
    }

    async fn fetch_to(&self, url: &str, staged: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(staged).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        let scratch = private_staging(&self.staging_dir, destination).await?;
        let staged = scratch.path().join(staging_name(destination));

        self.fetch_to(url, &staged).await?;
        move_into_place(&staged, destination).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
