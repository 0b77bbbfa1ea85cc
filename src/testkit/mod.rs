//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`fakes`]: In-memory implementations of every outbound port.
//! - [`config`]: Canonical test configurations rooted at a temp volume.

pub mod config;
pub mod fakes;

use std::sync::Arc;

use crate::application::toolchain::Toolchain;
use fakes::{FakeDownloader, FakeHardware, FakeLauncher, FakePackageManager, FakeProbes, FakeReadiness, FakeSourceControl};

/// Concrete fakes behind a [`Toolchain`], kept so tests can inspect them.
pub struct FakeToolchain {
    pub hardware: Arc<FakeHardware>,
    pub packages: Arc<FakePackageManager>,
    pub probes: Arc<FakeProbes>,
    pub source_control: Arc<FakeSourceControl>,
    pub downloader: Arc<FakeDownloader>,
    pub launcher: Arc<FakeLauncher>,
    pub readiness: Arc<FakeReadiness>,
}

impl FakeToolchain {
    /// Everything succeeds on a host reporting `capability` (`None` for no
    /// accelerator).
    pub fn healthy(capability: Option<&str>) -> Self {
        Self {
            hardware: Arc::new(capability.map_or_else(FakeHardware::none, FakeHardware::with_capability)),
            packages: Arc::new(FakePackageManager::new()),
            probes: Arc::new(FakeProbes::passing()),
            source_control: Arc::new(FakeSourceControl::new()),
            downloader: Arc::new(FakeDownloader::new()),
            launcher: Arc::new(FakeLauncher::long_running()),
            readiness: Arc::new(FakeReadiness::always()),
        }
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            hardware: self.hardware.clone(),
            packages: self.packages.clone(),
            probes: self.probes.clone(),
            source_control: self.source_control.clone(),
            downloader: self.downloader.clone(),
            launcher: self.launcher.clone(),
            readiness: self.readiness.clone(),
        }
    }
}
