//! Service command line construction and readiness polling.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::environment::RuntimeEnvironment;
use crate::domain::gpu::GpuProfile;
use crate::domain::service::{LaunchSpec, ReadyState, CPU_FALLBACK_FLAG, DISABLE_SECONDARY_FLAG};
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::probe::{Probe, ProbeRunner};
use crate::port::outbound::readiness::ReadinessCheck;

/// Static parts of the service command line.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub entrypoint: String,
    pub host: String,
    pub port: u16,
    pub extra_args: Vec<String>,
    pub workdir: PathBuf,
}

impl LaunchPlan {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            entrypoint: config.service.entrypoint.clone(),
            host: config.service.host.clone(),
            port: config.service.port,
            extra_args: config.service.extra_args.clone(),
            workdir: config.service_workdir(),
        }
    }
}

/// Toggles decided at boot time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchFlags {
    pub cpu_fallback: bool,
    pub disable_secondary: bool,
}

/// `PATH` with the environment's executables first.
#[must_use]
pub fn path_with(env: &RuntimeEnvironment) -> String {
    let bin = env.bin_dir().display().to_string();
    match std::env::var("PATH") {
        Ok(path) if !path.is_empty() => format!("{bin}:{path}"),
        _ => bin,
    }
}

/// `<interpreter> <entrypoint> --listen <host> --port <port> [flags] [extra]`
#[must_use]
pub fn service_spec(env: &RuntimeEnvironment, plan: &LaunchPlan, flags: LaunchFlags) -> LaunchSpec {
    let mut spec = LaunchSpec::new(env.interpreter())
        .arg(&plan.entrypoint)
        .args(["--listen", plan.host.as_str()])
        .args(["--port".to_string(), plan.port.to_string()]);
    if flags.cpu_fallback {
        spec = spec.arg(CPU_FALLBACK_FLAG);
    }
    if flags.disable_secondary {
        spec = spec.arg(DISABLE_SECONDARY_FLAG);
    }
    spec.args(plan.extra_args.iter().cloned())
        .workdir(&plan.workdir)
        .env("PATH", path_with(env))
        .env("VIRTUAL_ENV", env.path().display().to_string())
        .env("PYTHONUNBUFFERED", "1")
}

/// Development console command line.
#[must_use]
pub fn console_spec(env: &RuntimeEnvironment, host: &str, port: u16, workdir: &std::path::Path) -> LaunchSpec {
    LaunchSpec::new(env.bin_dir().join("jupyter"))
        .args(["lab", "--ip", host])
        .args(["--port".to_string(), port.to_string()])
        .args(["--no-browser", "--allow-root"])
        .workdir(workdir)
        .env("PATH", path_with(env))
        .env("VIRTUAL_ENV", env.path().display().to_string())
}

/// Whether the service must run on the CPU.
///
/// Classification alone is not enough: the runtime inside the environment
/// decides whether the accelerator is actually usable.
pub async fn needs_cpu_fallback(
    probes: &dyn ProbeRunner,
    env: &RuntimeEnvironment,
    profile: &GpuProfile,
) -> bool {
    if !profile.has_accelerator() {
        return true;
    }
    match probes.run(env.interpreter(), Probe::DeviceAvailable).await {
        Ok(outcome) if outcome.passed => false,
        Ok(outcome) => {
            warn!(detail = %outcome.detail, "Accelerator detected but unusable, falling back to CPU");
            true
        }
        Err(e) => {
            warn!(error = %e, "Device probe failed, falling back to CPU");
            true
        }
    }
}

/// Polls the readiness endpoint a bounded number of times.
pub struct HealthProber {
    readiness: Arc<dyn ReadinessCheck>,
    url: String,
    interval: Duration,
    attempts: u32,
}

impl HealthProber {
    #[must_use]
    pub fn new(readiness: Arc<dyn ReadinessCheck>, url: impl Into<String>, interval: Duration, attempts: u32) -> Self {
        Self {
            readiness,
            url: url.into(),
            interval,
            attempts,
        }
    }

    #[must_use]
    pub fn from_config(readiness: Arc<dyn ReadinessCheck>, config: &Config) -> Self {
        Self::new(
            readiness,
            config.service.readiness_url(),
            config.service.health_interval(),
            config.service.health_attempts,
        )
    }

    /// `Ready` on the first 2xx, `Degraded` once attempts run out. Never
    /// stops the service.
    pub async fn wait_ready(&self) -> ReadyState {
        info!(url = %self.url, attempts = self.attempts, "Waiting for service readiness");
        for attempt in 1..=self.attempts {
            if self.readiness.check(&self.url).await {
                info!(url = %self.url, attempt, "Service ready");
                return ReadyState::Ready;
            }
            debug!(url = %self.url, attempt, "Service not ready yet");
            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        warn!(
            url = %self.url,
            attempts = self.attempts,
            "Service never became ready, leaving it running"
        );
        ReadyState::Degraded
    }
}
