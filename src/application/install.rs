//! Primary accelerator runtime installation.
//!
//! The fast path (pinned version already present and working) never touches
//! the lock. Everything else happens inside the install lock, re-checking the
//! version first in case a sibling container finished the work while we
//! waited.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::lock::FileLock;
use super::registry::{read_marker, write_marker};
use crate::domain::environment::{EnvironmentMarker, RuntimeEnvironment, RuntimePin};
use crate::domain::gpu::GpuProfile;
use crate::error::{BootError, Result};
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::package::{InstallRequest, PackageManager};
use crate::port::outbound::probe::{Probe, ProbeRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    /// Pinned version found and verified without locking.
    AlreadyInstalled,
    /// Another container installed it while this one waited for the lock.
    InstalledBySibling,
    Installed,
}

/// Package set and lock tuning for the coordinator.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub package: String,
    pub companions: Vec<String>,
    /// Removed before installing so no stale build shadows the pin.
    pub conflicting: Vec<String>,
    pub lock_timeout: Duration,
    pub lock_poll: Duration,
}

impl InstallPlan {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            package: config.runtime.package.clone(),
            companions: config.runtime.companions.clone(),
            conflicting: vec![config.secondary.package.clone()],
            lock_timeout: config.runtime.lock_timeout(),
            lock_poll: config.runtime.lock_poll_interval(),
        }
    }

    /// Requirements for the pinned set: the primary package at its exact
    /// version plus companions resolved from the same index.
    #[must_use]
    pub fn requirements(&self, pin: &RuntimePin) -> Vec<String> {
        std::iter::once(format!("{}=={}", self.package, pin.full_version()))
            .chain(self.companions.iter().cloned())
            .collect()
    }

    fn removal_set(&self) -> Vec<String> {
        std::iter::once(self.package.clone())
            .chain(self.companions.iter().cloned())
            .chain(self.conflicting.iter().cloned())
            .collect()
    }
}

pub struct InstallCoordinator {
    packages: Arc<dyn PackageManager>,
    probes: Arc<dyn ProbeRunner>,
    plan: InstallPlan,
}

impl InstallCoordinator {
    #[must_use]
    pub fn new(
        packages: Arc<dyn PackageManager>,
        probes: Arc<dyn ProbeRunner>,
        plan: InstallPlan,
    ) -> Self {
        Self {
            packages,
            probes,
            plan,
        }
    }

    /// Bring `env` to the pinned runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::RuntimeInstall`] or
    /// [`BootError::RuntimeVerification`] when the pinned runtime cannot be
    /// installed or fails its probe, and [`BootError::Lock`] on lock IO
    /// failure. All are fatal to the boot.
    pub async fn ensure(
        &self,
        env: &mut RuntimeEnvironment,
        profile: &GpuProfile,
        pin: &RuntimePin,
    ) -> Result<InstallOutcome> {
        let expected = pin.full_version();
        let on_device = profile.has_accelerator();
        let mut force = false;

        let installed = self.installed(env).await;
        if pin.matches(installed.as_deref()) {
            if self.verify(env, on_device, &expected).await.is_ok() {
                info!(version = %expected, "Primary runtime already installed");
                self.finish(env, &expected)?;
                return Ok(InstallOutcome::AlreadyInstalled);
            }
            warn!(version = %expected, "Installed runtime failed its probe, reinstalling");
            force = true;
        }

        let lock = FileLock::for_environment(env, self.plan.lock_timeout, self.plan.lock_poll);
        let guard = lock.acquire(self.plan.lock_timeout).await?;

        if !force {
            let installed = self.installed(env).await;
            if pin.matches(installed.as_deref()) && self.verify(env, on_device, &expected).await.is_ok() {
                info!(version = %expected, "Primary runtime installed by a sibling while waiting");
                self.finish(env, &expected)?;
                lock.release(guard);
                return Ok(InstallOutcome::InstalledBySibling);
            }
        }

        info!(
            version = %expected,
            index = %pin.index_url,
            previous = installed.as_deref().unwrap_or("none"),
            "Installing primary runtime"
        );

        let removal = self.plan.removal_set();
        if let Err(e) = self.packages.uninstall(env.interpreter(), &removal).await {
            warn!(error = %e, "Failed to remove previous runtime packages");
        }
        for package in &removal {
            env.forget_version(package);
        }

        let mut request =
            InstallRequest::new(self.plan.requirements(pin)).index_url(pin.index_url.clone());
        if force {
            request = request.force_reinstall();
        }
        self.packages
            .install(env.interpreter(), &request)
            .await
            .map_err(|e| BootError::RuntimeInstall {
                package: self.plan.package.clone(),
                version: expected.clone(),
                reason: e.to_string(),
            })?;

        let installed = self.installed(env).await;
        if !pin.matches(installed.as_deref()) {
            return Err(BootError::RuntimeVerification {
                version: expected,
                reason: format!(
                    "installer reported success but found {}",
                    installed.as_deref().unwrap_or("nothing")
                ),
            }
            .into());
        }
        self.verify(env, on_device, &expected).await?;

        self.finish(env, &expected)?;
        lock.release(guard);
        info!(version = %expected, "Primary runtime installed and verified");
        Ok(InstallOutcome::Installed)
    }

    async fn installed(&self, env: &RuntimeEnvironment) -> Option<String> {
        match self
            .packages
            .installed_version(env.interpreter(), &self.plan.package)
            .await
        {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, "Could not read installed runtime version");
                None
            }
        }
    }

    async fn verify(&self, env: &RuntimeEnvironment, on_device: bool, version: &str) -> Result<()> {
        verify_primary(self.probes.as_ref(), env.interpreter(), on_device, version).await
    }

    /// Guard that holds `env` to `pin` after later installs touch it.
    #[must_use]
    pub fn guard(&self, profile: &GpuProfile, pin: &RuntimePin) -> PrimaryGuard {
        PrimaryGuard::new(
            self.packages.clone(),
            self.probes.clone(),
            self.plan.clone(),
            pin.clone(),
            profile.has_accelerator(),
        )
    }

    /// Record the verified version in memory and in the marker.
    fn finish(&self, env: &mut RuntimeEnvironment, version: &str) -> Result<()> {
        env.record_version(self.plan.package.clone(), version);
        let previous = read_marker(env);
        if previous
            .as_ref()
            .is_some_and(|m| m.runtime_version == version && m.architecture == env.architecture())
        {
            return Ok(());
        }
        let marker = EnvironmentMarker {
            architecture: env.architecture(),
            runtime_version: version.to_string(),
            secondary_version: previous.and_then(|m| m.secondary_version),
            updated_at: Utc::now(),
        };
        write_marker(env, &marker)
    }
}

/// Holds an environment to its pinned primary runtime after other packages
/// were installed into it.
///
/// Resolving an unrelated package can replace the primary runtime with
/// another build. [`PrimaryGuard::reassert`] puts the pinned build back and
/// re-runs the primary probe; anything short of a verified pin is fatal.
#[derive(Clone)]
pub struct PrimaryGuard {
    packages: Arc<dyn PackageManager>,
    probes: Arc<dyn ProbeRunner>,
    plan: InstallPlan,
    pin: RuntimePin,
    on_device: bool,
}

impl PrimaryGuard {
    #[must_use]
    pub fn new(
        packages: Arc<dyn PackageManager>,
        probes: Arc<dyn ProbeRunner>,
        plan: InstallPlan,
        pin: RuntimePin,
        on_device: bool,
    ) -> Self {
        Self {
            packages,
            probes,
            plan,
            pin,
            on_device,
        }
    }

    #[must_use]
    pub fn pin(&self) -> &RuntimePin {
        &self.pin
    }

    #[must_use]
    pub fn package(&self) -> &str {
        &self.plan.package
    }

    /// The install lock of `env`, tuned like the coordinator's.
    #[must_use]
    pub fn lock(&self, env: &RuntimeEnvironment) -> FileLock {
        FileLock::for_environment(env, self.plan.lock_timeout, self.plan.lock_poll)
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        self.plan.lock_timeout
    }

    /// Restore the pinned build if it moved, then verify it.
    ///
    /// Returns whether a restore was needed.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::RuntimeInstall`] when the pinned build cannot be
    /// reinstalled and [`BootError::RuntimeVerification`] when the version is
    /// still wrong afterwards or the primary probe fails.
    pub async fn reassert(&self, interpreter: &Path) -> Result<bool> {
        let expected = self.pin.full_version();
        let found = self.installed(interpreter, &expected).await?;
        let mut restored = false;

        if !self.pin.matches(found.as_deref()) {
            warn!(
                expected = %expected,
                found = found.as_deref().unwrap_or("none"),
                "Primary runtime drifted, restoring pinned build"
            );
            let restore = InstallRequest::new(self.plan.requirements(&self.pin))
                .index_url(self.pin.index_url.clone())
                .no_deps()
                .force_reinstall();
            self.packages
                .install(interpreter, &restore)
                .await
                .map_err(|e| BootError::RuntimeInstall {
                    package: self.plan.package.clone(),
                    version: expected.clone(),
                    reason: e.to_string(),
                })?;

            let found = self.installed(interpreter, &expected).await?;
            if !self.pin.matches(found.as_deref()) {
                return Err(BootError::RuntimeVerification {
                    version: expected,
                    reason: format!(
                        "restore left {}",
                        found.as_deref().unwrap_or("nothing")
                    ),
                }
                .into());
            }
            restored = true;
        }

        verify_primary(self.probes.as_ref(), interpreter, self.on_device, &expected).await?;
        Ok(restored)
    }

    async fn installed(&self, interpreter: &Path, expected: &str) -> Result<Option<String>> {
        self.packages
            .installed_version(interpreter, &self.plan.package)
            .await
            .map_err(|e| {
                BootError::RuntimeVerification {
                    version: expected.to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }
}

async fn verify_primary(
    probes: &dyn ProbeRunner,
    interpreter: &Path,
    on_device: bool,
    version: &str,
) -> Result<()> {
    let outcome = probes
        .run(interpreter, Probe::PrimaryRuntime { on_device })
        .await
        .map_err(|e| BootError::RuntimeVerification {
            version: version.to_string(),
            reason: e.to_string(),
        })?;
    if outcome.passed {
        Ok(())
    } else {
        Err(BootError::RuntimeVerification {
            version: version.to_string(),
            reason: outcome.detail,
        }
        .into())
    }
}
