//! Served application and auxiliary console configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// How the served application is launched and probed.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Name the supervised process is logged under.
    #[serde(default = "default_name")]
    pub name: String,
    /// Application checkout; defaults to `<volume>/comfyui`.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    /// Script run by the environment's interpreter, relative to `workdir`.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Appended verbatim after the generated arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Seconds between readiness probes.
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// Readiness probes before the service is declared degraded.
    #[serde(default = "default_health_attempts")]
    pub health_attempts: u32,
    /// Relaunches allowed after installing a missing module.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Pause between terminating and relaunching (seconds).
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
    /// Modules the supervisor may install when the service reports them missing.
    #[serde(default = "default_allowlist")]
    pub auto_install_allowlist: Vec<String>,
}

fn default_name() -> String {
    "comfyui".to_string()
}

fn default_entrypoint() -> String {
    "main.py".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8188
}

const fn default_health_interval_secs() -> u64 {
    5
}

const fn default_health_attempts() -> u32 {
    60
}

const fn default_max_restarts() -> u32 {
    3
}

const fn default_restart_delay_secs() -> u64 {
    2
}

fn default_allowlist() -> Vec<String> {
    [
        "aiohttp",
        "requests",
        "psutil",
        "scipy",
        "torchsde",
        "omegaconf",
        "accelerate",
        "diffusers",
        "kornia",
        "timm",
        "einops",
        "transformers",
        "safetensors",
        "spandrel",
        "av",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            workdir: None,
            entrypoint: default_entrypoint(),
            host: default_host(),
            port: default_port(),
            extra_args: Vec::new(),
            health_interval_secs: default_health_interval_secs(),
            health_attempts: default_health_attempts(),
            max_restarts: default_max_restarts(),
            restart_delay_secs: default_restart_delay_secs(),
            auto_install_allowlist: default_allowlist(),
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Host used to reach the service from inside the container.
    #[must_use]
    pub fn probe_host(&self) -> &str {
        match self.host.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            "::" | "[::]" => "[::1]",
            other => other,
        }
    }

    /// Readiness endpoint (`GET /`).
    #[must_use]
    pub fn readiness_url(&self) -> String {
        format!("http://{}:{}/", self.probe_host(), self.port)
    }

    #[must_use]
    pub fn allows_auto_install(&self, module: &str) -> bool {
        self.auto_install_allowlist.iter().any(|m| m == module)
    }
}

/// Optional development console started next to the service.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_console_port")]
    pub port: u16,
}

const fn default_console_port() -> u16 {
    8888
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_console_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_hosts_are_probed_on_loopback() {
        let mut config = ServiceConfig::default();
        assert_eq!(config.readiness_url(), "http://127.0.0.1:8188/");
        config.host = "::".into();
        assert_eq!(config.probe_host(), "[::1]");
        config.host = "10.0.0.5".into();
        config.port = 9000;
        assert_eq!(config.readiness_url(), "http://10.0.0.5:9000/");
    }

    #[test]
    fn service_name_is_configurable() {
        assert_eq!(ServiceConfig::default().name, "comfyui");
        let config: ServiceConfig = toml::from_str("name = \"forge\"\nport = 7860").unwrap();
        assert_eq!(config.name, "forge");
        assert_eq!(config.entrypoint, "main.py");
    }

    #[test]
    fn allowlist_is_exact() {
        let config = ServiceConfig::default();
        assert!(config.allows_auto_install("torchsde"));
        assert!(!config.allows_auto_install("torch"));
        assert!(!config.allows_auto_install("torchsd"));
    }
}
