//! Composition root: wire real adapters into a [`Toolchain`].

use std::sync::Arc;

use tracing::info;

use crate::adapter::outbound::download::{Aria2c, FallbackDownloader, HttpDownloader};
use crate::adapter::outbound::git::Git;
use crate::adapter::outbound::nvidia::NvidiaSmi;
use crate::adapter::outbound::process::TokioLauncher;
use crate::adapter::outbound::python::PythonProbes;
use crate::adapter::outbound::readiness::HttpReadiness;
use crate::adapter::outbound::uv::Uv;
use crate::application::toolchain::Toolchain;
use crate::error::Result;
use crate::infrastructure::config::provisioning::DownloaderKind;
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::fetch::Downloader;

/// Build the production toolchain from configuration.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn build_toolchain(config: &Config) -> Result<Toolchain> {
    let downloader = build_downloader(config);
    info!(downloader = downloader.name(), "Toolchain ready");

    Ok(Toolchain {
        hardware: Arc::new(NvidiaSmi::default()),
        packages: Arc::new(Uv::new(config.package_cache_dir(), config.tmp_dir())),
        probes: Arc::new(PythonProbes::new(config.secondary.package.clone())),
        source_control: Arc::new(Git::new(config.tmp_dir())),
        downloader,
        launcher: Arc::new(TokioLauncher),
        readiness: Arc::new(HttpReadiness::new()?),
    })
}

/// Build the binary asset downloader selected by `provisioning.downloader`.
pub(crate) fn build_downloader(config: &Config) -> Arc<dyn Downloader> {
    let staging = config.tmp_dir();
    match config.provisioning.downloader {
        DownloaderKind::Auto => Arc::new(FallbackDownloader::new(
            Aria2c::detect(&staging),
            HttpDownloader::new(&staging),
        )),
        DownloaderKind::Aria2c => Arc::new(FallbackDownloader::new(
            Some(Aria2c::new("aria2c", &staging)),
            HttpDownloader::new(&staging),
        )),
        DownloaderKind::Http => Arc::new(HttpDownloader::new(staging)),
    }
}
