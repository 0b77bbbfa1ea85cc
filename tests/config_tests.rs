use std::fs;
use std::path::PathBuf;

use gpuboot::domain::gpu::ArchitectureClass;
use gpuboot::error::{ConfigError, Error};
use gpuboot::infrastructure::config::provisioning::DownloaderKind;
use gpuboot::infrastructure::Config;
use tempfile::TempDir;

fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("config.toml");
    fs::write(&path, contents).expect("write temp config");
    (dir, path)
}

#[test]
fn full_config_round_trips_into_settings() {
    let (_dir, path) = write_config(
        r#"
require_gpu = true

[volume]
root = "/mnt/netdrive"
require_mount = true

[runtime]
lock_timeout_secs = 600

[runtime.pins.blackwell]
version = "2.8.0"
index_url = "https://download.pytorch.org/whl/nightly/cu128"

[secondary]
enabled = false

[provisioning]
downloader = "http"
concurrency = 4

[service]
port = 3000
extra_args = ["--preview-method", "auto"]
auto_install_allowlist = ["opencv-python"]

[console]
enabled = true
port = 8888

[logging]
level = "debug"
format = "json"
"#,
    );

    let config = Config::load(&path).expect("valid config");
    assert!(config.require_gpu);
    assert!(config.volume.require_mount);
    assert_eq!(config.runtime.lock_timeout_secs, 600);
    assert!(!config.secondary.enabled);
    assert!(matches!(config.provisioning.downloader, DownloaderKind::Http));
    assert_eq!(config.provisioning.concurrency, 4);
    assert_eq!(config.service.port, 3000);
    assert_eq!(config.service.extra_args, vec!["--preview-method", "auto"]);
    assert!(config.service.allows_auto_install("opencv-python"));
    assert!(!config.service.allows_auto_install("numpy"));
    assert!(config.console.enabled);

    let pin = config.runtime.pin_for(ArchitectureClass::Blackwell);
    assert_eq!(pin.full_version(), "2.8.0+cu128");
    assert_eq!(pin.index_url, "https://download.pytorch.org/whl/nightly/cu128");
}

#[test]
fn zero_intervals_are_rejected() {
    for (toml, field) in [
        ("[service]\nhealth_interval_secs = 0\n", "health_interval_secs"),
        ("[service]\nhealth_attempts = 0\n", "health_attempts"),
        ("[runtime]\nlock_timeout_secs = 0\n", "lock_timeout_secs"),
        ("[provisioning]\nconcurrency = 0\n", "concurrency"),
    ] {
        let (_dir, path) = write_config(toml);
        match Config::load(&path) {
            Err(Error::Config(ConfigError::InvalidValue { field: got, .. })) => {
                assert_eq!(got, field);
            }
            Err(err) => panic!("expected invalid {field}, got {err}"),
            Ok(_) => panic!("expected {field} = 0 to be rejected"),
        }
    }
}

#[test]
fn empty_override_value_is_rejected() {
    let (_dir, path) = write_config("[runtime.pins.ada]\ntoolchain = \"  \"\n");
    assert!(matches!(
        Config::load(&path),
        Err(Error::Config(ConfigError::InvalidValue {
            field: "runtime.pins",
            ..
        }))
    ));
}

#[test]
fn unknown_class_in_pins_is_a_parse_error() {
    let (_dir, path) = write_config("[runtime.pins.kepler]\nversion = \"1.0\"\n");
    assert!(matches!(
        Config::load(&path),
        Err(Error::Config(ConfigError::Parse(_)))
    ));
}
