//! Primary runtime pins and install-lock tuning.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::environment::RuntimePin;
use crate::domain::gpu::ArchitectureClass;

const PYTORCH_INDEX: &str = "https://download.pytorch.org/whl";

/// Per-class override of the built-in pin table. Unset fields keep defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PinOverride {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub toolchain: Option<String>,
    #[serde(default)]
    pub index_url: Option<String>,
}

/// Primary accelerator runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Package whose version is pinned (default: `torch`).
    #[serde(default = "default_package")]
    pub package: String,
    /// Packages installed alongside the primary one from the same index.
    #[serde(default = "default_companions")]
    pub companions: Vec<String>,
    /// Age after which an install lock is considered stale, and the maximum
    /// time spent waiting on a fresh one (seconds).
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Interval between lock re-checks while waiting (seconds).
    #[serde(default = "default_lock_poll_secs")]
    pub lock_poll_secs: u64,
    /// Overrides keyed by architecture class name.
    #[serde(default)]
    pub pins: BTreeMap<ArchitectureClass, PinOverride>,
}

fn default_package() -> String {
    "torch".to_string()
}

fn default_companions() -> Vec<String> {
    vec!["torchvision".to_string(), "torchaudio".to_string()]
}

const fn default_lock_timeout_secs() -> u64 {
    300
}

const fn default_lock_poll_secs() -> u64 {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            package: default_package(),
            companions: default_companions(),
            lock_timeout_secs: default_lock_timeout_secs(),
            lock_poll_secs: default_lock_poll_secs(),
            pins: BTreeMap::new(),
        }
    }
}

/// Built-in base version for each class.
fn default_version(class: ArchitectureClass) -> &'static str {
    match class {
        ArchitectureClass::Blackwell
        | ArchitectureClass::Hopper
        | ArchitectureClass::CpuOnly => "2.7.1",
        ArchitectureClass::Ada | ArchitectureClass::Ampere | ArchitectureClass::Legacy => "2.5.1",
    }
}

impl RuntimeConfig {
    /// Resolve the pin for a class, applying any configured override.
    #[must_use]
    pub fn pin_for(&self, class: ArchitectureClass) -> RuntimePin {
        let overrides = self.pins.get(&class);
        let toolchain = overrides
            .and_then(|o| o.toolchain.clone())
            .unwrap_or_else(|| class.default_toolchain().to_string());
        let version = overrides
            .and_then(|o| o.version.clone())
            .unwrap_or_else(|| default_version(class).to_string());
        let index_url = overrides
            .and_then(|o| o.index_url.clone())
            .unwrap_or_else(|| format!("{PYTORCH_INDEX}/{toolchain}"));
        RuntimePin {
            version,
            toolchain,
            index_url,
        }
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    #[must_use]
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_secs(self.lock_poll_secs)
    }
}

/// Optional performance module layered on the primary runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct SecondaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_secondary_package")]
    pub package: String,
    /// Version requirement appended to the package (e.g. `==0.0.30`).
    #[serde(default)]
    pub version: Option<String>,
    /// Override source; defaults to the primary pin's index.
    #[serde(default)]
    pub index_url: Option<String>,
}

const fn default_true() -> bool {
    true
}

fn default_secondary_package() -> String {
    "xformers".to_string()
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            package: default_secondary_package(),
            version: None,
            index_url: None,
        }
    }
}

impl SecondaryConfig {
    /// Requirement string handed to the installer.
    #[must_use]
    pub fn requirement(&self) -> String {
        match &self.version {
            Some(version) if version.starts_with(['=', '<', '>', '~', '!']) => {
                format!("{}{}", self.package, version)
            }
            Some(version) => format!("{}=={}", self.package, version),
            None => self.package.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pins_follow_class_toolchain() {
        let config = RuntimeConfig::default();
        let blackwell = config.pin_for(ArchitectureClass::Blackwell);
        assert_eq!(blackwell.full_version(), "2.7.1+cu128");
        assert_eq!(blackwell.index_url, "https://download.pytorch.org/whl/cu128");

        let cpu = config.pin_for(ArchitectureClass::CpuOnly);
        assert_eq!(cpu.full_version(), "2.7.1+cpu");

        let legacy = config.pin_for(ArchitectureClass::Legacy);
        assert_eq!(legacy.full_version(), "2.5.1+cu118");
    }

    #[test]
    fn overrides_apply_per_field() {
        let config: RuntimeConfig = toml::from_str(
            r#"
[pins.hopper]
version = "2.8.0"

[pins.ada]
toolchain = "cu126"
index_url = "https://mirror.internal/whl/cu126"
"#,
        )
        .unwrap();

        let hopper = config.pin_for(ArchitectureClass::Hopper);
        assert_eq!(hopper.full_version(), "2.8.0+cu126");
        assert_eq!(hopper.index_url, "https://download.pytorch.org/whl/cu126");

        let ada = config.pin_for(ArchitectureClass::Ada);
        assert_eq!(ada.full_version(), "2.5.1+cu126");
        assert_eq!(ada.index_url, "https://mirror.internal/whl/cu126");
    }

    #[test]
    fn secondary_requirement_formats() {
        let mut config = SecondaryConfig::default();
        assert_eq!(config.requirement(), "xformers");
        config.version = Some("0.0.30".into());
        assert_eq!(config.requirement(), "xformers==0.0.30");
        config.version = Some(">=0.0.28".into());
        assert_eq!(config.requirement(), "xformers>=0.0.28");
    }
}
