//! Handler for the `config` command group, plus the config loading shared
//! by every other handler.

use std::path::Path;

use crate::adapter::inbound::cli::output;
use crate::domain::gpu::ArchitectureClass;
use crate::error::Result;
use crate::infrastructure::config::settings::Config;

/// Load the config at `path` (defaults when the file is absent) and start
/// logging, honouring the global output flags.
pub fn load(path: &Path) -> Result<Config> {
    let mut config = Config::load_or_default(path)?;
    if output::is_json() {
        config.logging.format = "json".to_string();
    }
    match output::verbosity() {
        0 if output::is_quiet() => config.logging.level = "warn".to_string(),
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    config.init_logging();
    Ok(config)
}

/// Execute `config show`.
pub fn execute_show(path: &Path) -> Result<()> {
    let config = Config::load_or_default(path)?;

    output::section("Effective Configuration");
    output::field(
        "Source",
        if path.exists() {
            path.display().to_string()
        } else {
            "(defaults)".to_string()
        },
    );
    output::field("Require GPU", config.require_gpu);

    output::section("Volume");
    output::field("Root", config.volume.root.display());
    output::field("Require mount", config.volume.require_mount);
    output::field("Environments", config.envs_root().display());
    output::field("Alias", config.legacy_alias().display());
    output::field("Scratch", config.tmp_dir().display());
    output::field("Package cache", config.package_cache_dir().display());
    output::field("Logs", config.log_dir().display());

    output::section("Runtime");
    output::field("Package", &config.runtime.package);
    output::field("Lock timeout", format!("{}s", config.runtime.lock_timeout_secs));
    for class in ArchitectureClass::ALL {
        let pin = config.runtime.pin_for(class);
        output::field(class.as_str(), format!("{} ({})", pin.full_version(), pin.index_url));
    }

    output::section("Secondary");
    output::field("Enabled", config.secondary.enabled);
    output::field("Package", &config.secondary.package);

    output::section("Provisioning");
    output::field("Enabled", config.provisioning.enabled);
    output::field("Extensions", config.provisioning.extensions_manifest.display());
    output::field("Assets", config.provisioning.assets_manifest.display());
    output::field("Concurrency", config.provisioning.concurrency);

    output::section("Service");
    output::field("Workdir", config.service_workdir().display());
    output::field("Entrypoint", &config.service.entrypoint);
    output::field("Listen", format!("{}:{}", config.service.host, config.service.port));
    output::field("Readiness", config.service.readiness_url());
    output::field("Max restarts", config.service.max_restarts);
    output::field(
        "Auto-install",
        config.service.auto_install_allowlist.join(", "),
    );

    output::section("Console");
    output::field("Enabled", config.console.enabled);
    output::field("Port", config.console.port);

    output::section("Logging");
    output::field("Level", &config.logging.level);
    output::field("Format", &config.logging.format);

    Ok(())
}

/// Execute `config validate`.
pub fn execute_validate(path: &Path) -> Result<()> {
    output::section("Config Validation");
    output::field("Path", path.display());
    let config = Config::load(path)?;
    output::success("Config file is valid");

    let mut warnings = Vec::new();
    if !config.volume.root.is_dir() {
        warnings.push(format!(
            "volume root {} does not exist on this machine",
            config.volume.root.display()
        ));
    }
    if config.provisioning.enabled && !config.provisioning.extensions_manifest.exists() {
        warnings.push(format!(
            "extensions manifest {} not found; extensions will be skipped",
            config.provisioning.extensions_manifest.display()
        ));
    }
    if config.provisioning.enabled && !config.provisioning.assets_manifest.exists() {
        warnings.push(format!(
            "assets manifest {} not found; assets will be skipped",
            config.provisioning.assets_manifest.display()
        ));
    }
    if !warnings.is_empty() {
        output::section("Warnings");
        for warning in &warnings {
            output::warning(warning);
        }
    }

    output::field("Next", format!("gpuboot config show -c {}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, Error};

    #[test]
    fn validate_accepts_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        execute_validate(&path).unwrap();
    }

    #[test]
    fn validate_requires_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = execute_validate(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(Error::Config(ConfigError::ReadFile(_)))));
    }

    #[test]
    fn show_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        execute_show(&dir.path().join("missing.toml")).unwrap();
    }

    #[test]
    fn show_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[service]\nport = 0\n").unwrap();
        assert!(execute_show(&path).is_err());
    }
}
