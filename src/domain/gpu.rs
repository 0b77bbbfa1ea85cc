//! Accelerator classification.
//!
//! Maps a vendor-reported compute capability (`"major.minor"`) onto an
//! [`ArchitectureClass`] with an ordered, descending-threshold table. The
//! mapping is a step function: every capability lands in exactly one class
//! and a higher capability never lands in an older class.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Hardware generation bucket used to key runtime environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchitectureClass {
    /// No accelerator detected.
    CpuOnly,
    /// Anything older than Ampere consumer parts (capability < 8.6).
    Legacy,
    Ampere,
    Ada,
    Hopper,
    Blackwell,
}

impl ArchitectureClass {
    pub const ALL: [ArchitectureClass; 6] = [
        Self::CpuOnly,
        Self::Legacy,
        Self::Ampere,
        Self::Ada,
        Self::Hopper,
        Self::Blackwell,
    ];

    /// Stable name, also used as the environment directory name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CpuOnly => "cpu-only",
            Self::Legacy => "legacy",
            Self::Ampere => "ampere",
            Self::Ada => "ada",
            Self::Hopper => "hopper",
            Self::Blackwell => "blackwell",
        }
    }

    /// Default toolchain tag selecting the pinned runtime build.
    #[must_use]
    pub const fn default_toolchain(self) -> &'static str {
        match self {
            Self::CpuOnly => "cpu",
            Self::Legacy => "cu118",
            Self::Ampere | Self::Ada => "cu124",
            Self::Hopper => "cu126",
            Self::Blackwell => "cu128",
        }
    }

    #[must_use]
    pub const fn has_accelerator(self) -> bool {
        !matches!(self, Self::CpuOnly)
    }
}

impl fmt::Display for ArchitectureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchitectureClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| format!("unknown architecture class '{s}'"))
    }
}

/// Compute capability as an ordered `(major, minor)` pair.
///
/// Compared component-wise, so `8.10` sorts above `8.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Capability {
    pub major: u32,
    pub minor: u32,
}

impl Capability {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse a `"major.minor"` reading. A bare `"9"` is read as `9.0`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (major, minor) = match raw.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (raw, "0"),
        };
        let major = major.trim().parse().ok()?;
        let minor = minor.trim().parse().ok()?;
        Some(Self { major, minor })
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Thresholds tested highest first; the first one at or below the reading wins.
///
/// The 10.0 row extends Blackwell below consumer parts (12.x) to the
/// data-center ones (10.x), which use the same toolchain.
const THRESHOLDS: [(Capability, ArchitectureClass); 5] = [
    (Capability::new(12, 0), ArchitectureClass::Blackwell),
    (Capability::new(10, 0), ArchitectureClass::Blackwell),
    (Capability::new(9, 0), ArchitectureClass::Hopper),
    (Capability::new(8, 9), ArchitectureClass::Ada),
    (Capability::new(8, 6), ArchitectureClass::Ampere),
];

/// Bucket a parsed capability.
#[must_use]
pub fn classify_capability(capability: Capability) -> ArchitectureClass {
    THRESHOLDS
        .iter()
        .find(|(threshold, _)| capability >= *threshold)
        .map_or(ArchitectureClass::Legacy, |(_, class)| *class)
}

/// Raw reading from the hardware query for the primary accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub name: String,
    pub capability: String,
    pub driver_version: String,
    pub total_memory_mib: Option<u64>,
}

/// Classified accelerator, computed once per boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuProfile {
    raw_capability: Option<String>,
    architecture: ArchitectureClass,
    toolchain: String,
    device: Option<GpuInfo>,
}

impl GpuProfile {
    /// Classify a raw capability reading. `None` means no accelerator.
    ///
    /// Unparseable readings degrade to cpu-only so the boot always makes
    /// forward progress.
    #[must_use]
    pub fn classify(raw_capability: Option<&str>) -> Self {
        let architecture = match raw_capability {
            None => ArchitectureClass::CpuOnly,
            Some(raw) => match Capability::parse(raw) {
                Some(capability) => classify_capability(capability),
                None => {
                    warn!(raw, "Unparseable compute capability, falling back to cpu-only");
                    ArchitectureClass::CpuOnly
                }
            },
        };

        Self {
            raw_capability: raw_capability.map(ToOwned::to_owned),
            architecture,
            toolchain: architecture.default_toolchain().to_string(),
            device: None,
        }
    }

    /// Classify the result of a hardware query.
    #[must_use]
    pub fn from_device(device: Option<GpuInfo>) -> Self {
        match device {
            None => Self::classify(None),
            Some(info) => {
                let mut profile = Self::classify(Some(&info.capability));
                profile.device = Some(info);
                profile
            }
        }
    }

    /// Replace the toolchain tag (pins may override the class default).
    #[must_use]
    pub fn with_toolchain(mut self, toolchain: impl Into<String>) -> Self {
        self.toolchain = toolchain.into();
        self
    }

    #[must_use]
    pub fn raw_capability(&self) -> Option<&str> {
        self.raw_capability.as_deref()
    }

    #[must_use]
    pub fn architecture(&self) -> ArchitectureClass {
        self.architecture
    }

    #[must_use]
    pub fn toolchain(&self) -> &str {
        &self.toolchain
    }

    #[must_use]
    pub fn device(&self) -> Option<&GpuInfo> {
        self.device.as_ref()
    }

    #[must_use]
    pub fn has_accelerator(&self) -> bool {
        self.architecture.has_accelerator()
    }
}
