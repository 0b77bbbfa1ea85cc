//! Asset provisioning configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Which download backend the binary asset task uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloaderKind {
    /// `aria2c` when it is on `PATH`, HTTP otherwise.
    #[default]
    Auto,
    Aria2c,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    /// Run the provisioning step at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// JSON manifest `{name: [repo urls]}`.
    #[serde(default = "default_extensions_manifest")]
    pub extensions_manifest: PathBuf,
    /// JSON manifest `{category: [download urls]}`.
    #[serde(default = "default_assets_manifest")]
    pub assets_manifest: PathBuf,
    /// Defaults to `<service workdir>/custom_nodes`.
    #[serde(default)]
    pub extensions_dir: Option<PathBuf>,
    /// Defaults to `<service workdir>/models`.
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,
    /// Entries processed at once within each task.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// How often the supervisor logs elapsed time while waiting (seconds).
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    /// Install an extension's `requirements.txt` after a fresh clone.
    #[serde(default = "default_true")]
    pub install_requirements: bool,
    #[serde(default)]
    pub downloader: DownloaderKind,
}

const fn default_true() -> bool {
    true
}

fn default_extensions_manifest() -> PathBuf {
    PathBuf::from("/custom_nodes_list.json")
}

fn default_assets_manifest() -> PathBuf {
    PathBuf::from("/models_config.json")
}

const fn default_concurrency() -> usize {
    4
}

const fn default_progress_interval_secs() -> u64 {
    30
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extensions_manifest: default_extensions_manifest(),
            assets_manifest: default_assets_manifest(),
            extensions_dir: None,
            assets_dir: None,
            concurrency: default_concurrency(),
            progress_interval_secs: default_progress_interval_secs(),
            install_requirements: true,
            downloader: DownloaderKind::Auto,
        }
    }
}

impl ProvisioningConfig {
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}
