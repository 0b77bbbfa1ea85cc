//! Shared volume, environment registry, and cache locations.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeConfig {
    /// Root of the persistent shared volume.
    #[serde(default = "default_volume_root")]
    pub root: PathBuf,
    /// Additionally require the root to be a mount point.
    #[serde(default)]
    pub require_mount: bool,
}

fn default_volume_root() -> PathBuf {
    PathBuf::from("/mnt/netdrive")
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            root: default_volume_root(),
            require_mount: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentsConfig {
    /// Registry root; defaults to `<volume>/envs`.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Compatibility alias for tooling that expects a single environment;
    /// defaults to `<volume>/python_env`.
    #[serde(default)]
    pub legacy_alias: Option<PathBuf>,
    /// Interpreter version requested at creation.
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_python() -> String {
    "3.11".to_string()
}

impl Default for EnvironmentsConfig {
    fn default() -> Self {
        Self {
            root: None,
            legacy_alias: None,
            python: default_python(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Scratch space for partial downloads; defaults to `<volume>/tmp`.
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,
    /// Package tool cache; defaults to `<volume>/cache/uv`.
    #[serde(default)]
    pub package_dir: Option<PathBuf>,
}
