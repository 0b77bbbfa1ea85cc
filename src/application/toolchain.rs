//! The set of outbound ports a boot runs against.

use std::sync::Arc;

use crate::port::outbound::fetch::{Downloader, SourceControl};
use crate::port::outbound::hardware::HardwareQuery;
use crate::port::outbound::package::PackageManager;
use crate::port::outbound::probe::ProbeRunner;
use crate::port::outbound::process::ProcessLauncher;
use crate::port::outbound::readiness::ReadinessCheck;

/// Production wires real tools in; tests substitute fakes.
#[derive(Clone)]
pub struct Toolchain {
    pub hardware: Arc<dyn HardwareQuery>,
    pub packages: Arc<dyn PackageManager>,
    pub probes: Arc<dyn ProbeRunner>,
    pub source_control: Arc<dyn SourceControl>,
    pub downloader: Arc<dyn Downloader>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub readiness: Arc<dyn ReadinessCheck>,
}
