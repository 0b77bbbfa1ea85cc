//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests.
//! Avoids each test module defining its own slightly-different defaults.

use std::path::Path;

use crate::infrastructure::config::settings::Config;

/// Defaults rooted at `volume`, with manifests inside it and no waiting.
pub fn config_for(volume: &Path) -> Config {
    let mut config = Config::default();
    config.volume.root = volume.to_path_buf();
    config.provisioning.extensions_manifest = volume.join("custom_nodes_list.json");
    config.provisioning.assets_manifest = volume.join("models_config.json");
    config.provisioning.progress_interval_secs = 1;
    config.runtime.lock_timeout_secs = 2;
    config.runtime.lock_poll_secs = 1;
    config.service.restart_delay_secs = 0;
    config.service.health_interval_secs = 1;
    config.service.health_attempts = 3;
    config
}
