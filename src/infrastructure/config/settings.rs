//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all boot settings.
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration for the standard container layout. The value is
//! built once at startup and passed by reference into every component.
//!
//! # Example
//!
//! ```no_run
//! use gpuboot::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::logging::LoggingConfig;
use super::provisioning::ProvisioningConfig;
use super::runtime::{RuntimeConfig, SecondaryConfig};
use super::service::{ConsoleConfig, ServiceConfig};
use super::volume::{CacheConfig, EnvironmentsConfig, VolumeConfig};
use crate::error::{ConfigError, Result};

/// Environment variable overriding `volume.root`.
pub const VOLUME_ENV: &str = "GPUBOOT_VOLUME";

/// Main boot configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Persistent shared volume.
    #[serde(default)]
    pub volume: VolumeConfig,

    /// Runtime environment registry.
    #[serde(default)]
    pub environments: EnvironmentsConfig,

    /// Scratch and package caches.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Primary accelerator runtime pins and install locking.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Optional performance module.
    #[serde(default)]
    pub secondary: SecondaryConfig,

    /// Extension and binary asset provisioning.
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// Served application.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Auxiliary development console.
    #[serde(default)]
    pub console: ConsoleConfig,

    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Abort the boot when no accelerator is detected.
    #[serde(default)]
    pub require_gpu: bool,
}

impl Config {
    /// Parse configuration from TOML content.
    ///
    /// Applies the `GPUBOOT_VOLUME` override before validating.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;

        if let Ok(volume) = std::env::var(VOLUME_ENV) {
            if !volume.trim().is_empty() {
                config.volume.root = PathBuf::from(volume.trim());
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is malformed, or fails
    /// validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file is malformed or fails validation.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Self::parse_toml("")
        }
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.volume.root.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "volume.root",
            }
            .into());
        }
        if self.environments.python.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "environments.python",
            }
            .into());
        }
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "service.name",
            }
            .into());
        }
        if self.runtime.package.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "runtime.package",
            }
            .into());
        }
        if self.runtime.lock_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lock_timeout_secs",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.runtime.lock_poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lock_poll_secs",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.runtime.lock_poll_secs > self.runtime.lock_timeout_secs {
            return Err(ConfigError::InvalidValue {
                field: "lock_poll_secs",
                reason: "must be <= lock_timeout_secs".to_string(),
            }
            .into());
        }
        for (class, pin) in &self.runtime.pins {
            let blank = |value: &Option<String>| value.as_ref().is_some_and(|v| v.trim().is_empty());
            if blank(&pin.version) || blank(&pin.toolchain) || blank(&pin.index_url) {
                return Err(ConfigError::InvalidValue {
                    field: "runtime.pins",
                    reason: format!("override for {class} has an empty value"),
                }
                .into());
            }
        }
        if self.secondary.enabled && self.secondary.package.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "secondary.package",
            }
            .into());
        }
        if self.provisioning.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.provisioning.progress_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "progress_interval_secs",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.service.entrypoint.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "service.entrypoint",
            }
            .into());
        }
        if self.service.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.service.health_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_interval_secs",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.service.health_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_attempts",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.console.enabled && self.console.port == self.service.port {
            return Err(ConfigError::InvalidValue {
                field: "console.port",
                reason: "must differ from service.port".to_string(),
            }
            .into());
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "logging.format",
                    reason: format!("expected 'pretty' or 'json', got '{other}'"),
                }
                .into());
            }
        }
        Ok(())
    }

    fn under_volume(&self, configured: Option<&PathBuf>, relative: &str) -> PathBuf {
        configured
            .cloned()
            .unwrap_or_else(|| self.volume.root.join(relative))
    }

    #[must_use]
    pub fn envs_root(&self) -> PathBuf {
        self.under_volume(self.environments.root.as_ref(), "envs")
    }

    #[must_use]
    pub fn legacy_alias(&self) -> PathBuf {
        self.under_volume(self.environments.legacy_alias.as_ref(), "python_env")
    }

    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.under_volume(self.cache.tmp_dir.as_ref(), "tmp")
    }

    #[must_use]
    pub fn package_cache_dir(&self) -> PathBuf {
        self.under_volume(self.cache.package_dir.as_ref(), "cache/uv")
    }

    #[must_use]
    pub fn service_workdir(&self) -> PathBuf {
        self.under_volume(self.service.workdir.as_ref(), "comfyui")
    }

    #[must_use]
    pub fn extensions_dir(&self) -> PathBuf {
        self.provisioning
            .extensions_dir
            .clone()
            .unwrap_or_else(|| self.service_workdir().join("custom_nodes"))
    }

    #[must_use]
    pub fn assets_dir(&self) -> PathBuf {
        self.provisioning
            .assets_dir
            .clone()
            .unwrap_or_else(|| self.service_workdir().join("models"))
    }

    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.under_volume(self.logging.dir.as_ref(), "logs")
    }

    #[must_use]
    pub fn smoke_dir(&self) -> PathBuf {
        self.volume.root.join("smoke_tests")
    }

    /// Initialize logging, including the volume log streams when the log
    /// directory is reachable.
    pub fn init_logging(&self) {
        let dir = self.log_dir();
        let volume_present = self.volume.root.is_dir();
        self.logging.init(volume_present.then_some(dir.as_path()));
    }
}
