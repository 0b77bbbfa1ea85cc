//! Default locations for the operator's configuration.
//!
//! Containers ship their config at `/etc/gpuboot/config.toml`. Outside a
//! container the per-user `~/.gpuboot/config.toml` is used instead.

use std::path::{Path, PathBuf};

/// System-wide config file baked into container images.
pub const SYSTEM_CONFIG: &str = "/etc/gpuboot/config.toml";

/// Returns the per-user gpuboot directory (`~/.gpuboot/`).
pub fn home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gpuboot")
}

/// Returns the default config path: the system file when present, otherwise
/// `~/.gpuboot/config.toml`.
pub fn default_config() -> PathBuf {
    pick_config(Path::new(SYSTEM_CONFIG), home_dir().join("config.toml"))
}

fn pick_config(system: &Path, user: PathBuf) -> PathBuf {
    if system.exists() {
        system.to_path_buf()
    } else {
        user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_config_is_under_gpuboot_home() {
        assert!(home_dir().to_string_lossy().contains(".gpuboot"));
    }

    #[test]
    fn system_config_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("config.toml");
        let user = dir.path().join("user.toml");

        assert_eq!(pick_config(&system, user.clone()), user);
        std::fs::write(&system, "").unwrap();
        assert_eq!(pick_config(&system, user), system);
    }
}
