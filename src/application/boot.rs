//! Boot orchestration.
//!
//! ```text
//! volume check → classify → registry → install → alias → secondary
//!              → provision → launch → console → health
//! ```
//!
//! Every step before launch is either fatal (an `Err` out of [`Bootstrapper::boot`])
//! or absorbed at its own layer with a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use super::install::{InstallCoordinator, InstallOutcome, InstallPlan};
use super::launch::{console_spec, needs_cpu_fallback, service_spec, HealthProber, LaunchFlags, LaunchPlan};
use super::provision::{AssetSupervisor, ProvisionPlan, ProvisionReport};
use super::registry::EnvironmentRegistry;
use super::secondary::{SecondaryInstaller, SecondaryOutcome};
use super::supervisor::{RestartPolicy, RunningService, ServiceSupervisor};
use super::toolchain::Toolchain;
use crate::domain::environment::RuntimeEnvironment;
use crate::domain::gpu::{ArchitectureClass, GpuProfile};
use crate::domain::service::{ReadyState, ServiceProcess};
use crate::error::{BootError, Result};
use crate::infrastructure::config::settings::Config;

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Summary of a completed boot.
#[derive(Debug, Clone, Serialize)]
pub struct BootReport {
    pub profile: GpuProfile,
    pub architecture: ArchitectureClass,
    pub environment: PathBuf,
    pub installed_versions: BTreeMap<String, String>,
    pub install: InstallOutcome,
    pub secondary: SecondaryOutcome,
    pub provision: Option<ProvisionReport>,
    pub service: ServiceProcess,
}

/// A booted container: the report plus the processes left running.
#[derive(Debug)]
pub struct Booted {
    pub report: BootReport,
    pub service: RunningService,
    pub console: Option<RunningService>,
}

pub struct Bootstrapper<'a> {
    config: &'a Config,
    toolchain: Toolchain,
}

impl<'a> Bootstrapper<'a> {
    #[must_use]
    pub fn new(config: &'a Config, toolchain: Toolchain) -> Self {
        Self { config, toolchain }
    }

    #[must_use]
    pub fn registry(&self) -> EnvironmentRegistry {
        EnvironmentRegistry::new(
            self.config.envs_root(),
            self.config.legacy_alias(),
            self.config.environments.python.clone(),
            self.toolchain.packages.clone(),
        )
        .with_lock(
            self.config.runtime.lock_timeout(),
            self.config.runtime.lock_poll_interval(),
        )
    }

    /// Run the full boot sequence and leave the service running.
    ///
    /// # Errors
    ///
    /// Returns the first fatal precondition failure: missing volume, missing
    /// accelerator when one is required, environment creation, primary
    /// runtime install or verification, or a service that cannot be spawned.
    pub async fn boot(&self) -> Result<Booted> {
        check_volume(self.config)?;
        prepare_dirs(self.config)?;

        let profile = self.classify().await?;
        let pin = self.config.runtime.pin_for(profile.architecture());

        let registry = self.registry();
        let mut env = registry.ensure(profile.architecture()).await?;

        let coordinator = InstallCoordinator::new(
            self.toolchain.packages.clone(),
            self.toolchain.probes.clone(),
            InstallPlan::from_config(self.config),
        );
        let install = coordinator.ensure(&mut env, &profile, &pin).await?;
        let primary = coordinator.guard(&profile, &pin);

        // Only a verified environment is published under the alias.
        if let Err(e) = registry.point_alias(&env) {
            warn!(alias = %registry.alias().display(), error = %e, "Failed to update environment alias");
        }

        let secondary = SecondaryInstaller::new(
            self.toolchain.packages.clone(),
            self.toolchain.probes.clone(),
            self.config.secondary.clone(),
            primary.clone(),
        )
        .ensure(&mut env)
        .await?;

        let provision = if self.config.provisioning.enabled {
            Some(self.provision(Some(env.interpreter().to_path_buf())).await)
        } else {
            info!("Provisioning disabled");
            None
        };

        let flags = LaunchFlags {
            cpu_fallback: needs_cpu_fallback(self.toolchain.probes.as_ref(), &env, &profile).await,
            disable_secondary: secondary.compat_flag(),
        };
        let spec = service_spec(&env, &LaunchPlan::from_config(self.config), flags);
        let argv = spec.argv();
        info!(
            cpu_fallback = flags.cpu_fallback,
            disable_secondary = flags.disable_secondary,
            "Launching service"
        );
        let service = ServiceSupervisor::new(
            self.config.service.name.clone(),
            self.toolchain.launcher.clone(),
            self.toolchain.packages.clone(),
            env.interpreter(),
            spec,
            RestartPolicy::from_config(&self.config.service),
        )
        .guard_primary(primary, &env)
        .start()
        .await?;

        let console = self.start_console(&env).await;

        let ready_state =
            HealthProber::from_config(self.toolchain.readiness.clone(), self.config).wait_ready().await;

        let report = BootReport {
            architecture: profile.architecture(),
            profile,
            environment: env.path().to_path_buf(),
            installed_versions: env.installed_versions().clone(),
            install,
            secondary,
            provision,
            service: ServiceProcess {
                pid: service.pid(),
                listen_host: self.config.service.host.clone(),
                listen_port: self.config.service.port,
                argv,
                ready_state,
            },
        };
        match ready_state {
            ReadyState::Ready => info!(architecture = %report.architecture, "Boot complete"),
            _ => warn!(architecture = %report.architecture, "Boot complete, service degraded"),
        }

        Ok(Booted {
            report,
            service,
            console,
        })
    }

    /// Query the hardware and classify it.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::GpuRequired`] when `require_gpu` is set and no
    /// accelerator was found.
    pub async fn classify(&self) -> Result<GpuProfile> {
        let device = match self.toolchain.hardware.primary_device().await {
            Ok(device) => device,
            Err(e) => {
                warn!(query = self.toolchain.hardware.name(), error = %e, "Hardware query failed");
                None
            }
        };
        let profile = GpuProfile::from_device(device);
        let pin = self.config.runtime.pin_for(profile.architecture());
        let profile = profile.with_toolchain(pin.toolchain);

        info!(
            architecture = %profile.architecture(),
            capability = profile.raw_capability().unwrap_or("none"),
            toolchain = profile.toolchain(),
            device = profile.device().map_or("none", |d| d.name.as_str()),
            "Hardware classified"
        );

        if self.config.require_gpu && !profile.has_accelerator() {
            return Err(BootError::GpuRequired.into());
        }
        Ok(profile)
    }

    /// Run both provisioning tasks against the configured manifests.
    pub async fn provision(&self, interpreter: Option<PathBuf>) -> ProvisionReport {
        AssetSupervisor::new(
            self.toolchain.source_control.clone(),
            self.toolchain.downloader.clone(),
            self.toolchain.packages.clone(),
            ProvisionPlan::from_config(self.config),
        )
        .run(interpreter)
        .await
    }

    async fn start_console(&self, env: &RuntimeEnvironment) -> Option<RunningService> {
        if !self.config.console.enabled {
            return None;
        }
        let spec = console_spec(
            env,
            &self.config.service.host,
            self.config.console.port,
            &self.config.volume.root,
        );
        let console = ServiceSupervisor::new(
            "console",
            self.toolchain.launcher.clone(),
            self.toolchain.packages.clone(),
            env.interpreter(),
            spec,
            RestartPolicy::none(),
        );
        match console.start().await {
            Ok(running) => {
                info!(port = self.config.console.port, "Development console started");
                Some(running)
            }
            Err(e) => {
                warn!(error = %e, "Development console failed to start");
                None
            }
        }
    }
}

/// The shared volume must exist, be a directory, and (when configured) be a
/// mount point.
///
/// # Errors
///
/// Returns [`BootError::VolumeUnavailable`] otherwise.
pub fn check_volume(config: &Config) -> Result<()> {
    let root = &config.volume.root;
    let unavailable = |reason: String| BootError::VolumeUnavailable {
        path: root.clone(),
        reason,
    };

    let meta = std::fs::metadata(root).map_err(|e| unavailable(e.to_string()))?;
    if !meta.is_dir() {
        return Err(unavailable("not a directory".to_string()).into());
    }
    if config.volume.require_mount {
        let mountinfo = std::fs::read_to_string(MOUNTINFO)
            .map_err(|e| unavailable(format!("cannot read {MOUNTINFO}: {e}")))?;
        let canonical = root.canonicalize().map_err(|e| unavailable(e.to_string()))?;
        if !is_mount_point(&mountinfo, &canonical) {
            return Err(unavailable("not a mount point".to_string()).into());
        }
    }
    info!(path = %root.display(), "Shared volume available");
    Ok(())
}

/// Create the scratch, package cache and log directories on the volume.
///
/// # Errors
///
/// Returns [`BootError::VolumeUnavailable`] when a directory cannot be created.
pub fn prepare_dirs(config: &Config) -> Result<()> {
    for dir in [config.tmp_dir(), config.package_cache_dir(), config.log_dir()] {
        std::fs::create_dir_all(&dir).map_err(|e| BootError::VolumeUnavailable {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Whether `path` is listed as a mount point (fifth field) in `mountinfo`.
fn is_mount_point(mountinfo: &str, path: &Path) -> bool {
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|mount| Path::new(&unescape_mount(mount)) == path)
}

/// Undo the octal escapes the kernel applies to spaces, tabs, newlines and
/// backslashes.
fn unescape_mount(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}
