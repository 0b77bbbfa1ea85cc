//! Optional performance module layered on the primary runtime.
//!
//! A broken module is never fatal: it is uninstalled and the compatibility
//! flag tells the service to start without it. The primary runtime is
//! different. Installing the module may replace it, so after any install the
//! pinned build is restored and re-verified, and failing that aborts the boot.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::install::PrimaryGuard;
use super::registry::{read_marker, write_marker};
use crate::domain::environment::RuntimeEnvironment;
use crate::error::Result;
use crate::infrastructure::config::runtime::SecondaryConfig;
use crate::port::outbound::package::{InstallRequest, PackageManager};
use crate::port::outbound::probe::{Probe, ProbeRunner};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SecondaryOutcome {
    Disabled,
    Ready { version: String },
    Unavailable { reason: String },
}

impl SecondaryOutcome {
    /// Whether the service must be told to avoid the module.
    #[must_use]
    pub fn compat_flag(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub struct SecondaryInstaller {
    packages: Arc<dyn PackageManager>,
    probes: Arc<dyn ProbeRunner>,
    config: SecondaryConfig,
    primary: PrimaryGuard,
}

impl SecondaryInstaller {
    #[must_use]
    pub fn new(
        packages: Arc<dyn PackageManager>,
        probes: Arc<dyn ProbeRunner>,
        config: SecondaryConfig,
        primary: PrimaryGuard,
    ) -> Self {
        Self {
            packages,
            probes,
            config,
            primary,
        }
    }

    /// Install the module if missing or broken.
    ///
    /// # Errors
    ///
    /// Only primary runtime failures are returned: the pinned build could
    /// not be restored after the module moved it, or it fails its probe.
    /// Module failures become [`SecondaryOutcome::Unavailable`].
    pub async fn ensure(&self, env: &mut RuntimeEnvironment) -> Result<SecondaryOutcome> {
        if !self.config.enabled {
            info!(package = %self.config.package, "Secondary module disabled");
            return Ok(SecondaryOutcome::Disabled);
        }

        if let Some(version) = self.working_version(env).await {
            info!(package = %self.config.package, %version, "Secondary module already installed");
            self.record(env, Some(version.clone()));
            return Ok(SecondaryOutcome::Ready { version });
        }

        let lock = self.primary.lock(env);
        let held = lock.acquire(self.primary.lock_timeout()).await?;

        let outcome = match self.install(env).await {
            Ok(outcome) => outcome,
            Err(e) => SecondaryOutcome::Unavailable {
                reason: e.to_string(),
            },
        };

        if let SecondaryOutcome::Unavailable { reason } = &outcome {
            warn!(
                package = %self.config.package,
                reason = %reason,
                "Secondary module unusable, starting service without it"
            );
            let removal = [self.config.package.clone()];
            if let Err(e) = self.packages.uninstall(env.interpreter(), &removal).await {
                warn!(error = %e, "Failed to uninstall secondary module");
            }
        }

        // Whatever became of the module, the service must not start on
        // anything but the pinned, working primary build.
        self.primary.reassert(env.interpreter()).await?;

        match &outcome {
            SecondaryOutcome::Ready { version } => self.record(env, Some(version.clone())),
            _ => self.record(env, None),
        }
        lock.release(held);
        Ok(outcome)
    }

    async fn working_version(&self, env: &RuntimeEnvironment) -> Option<String> {
        let package = &self.config.package;
        let version = match self.packages.installed_version(env.interpreter(), package).await {
            Ok(version) => version?,
            Err(e) => {
                warn!(%package, error = %e, "Could not read secondary module version");
                return None;
            }
        };
        match self.probe(env).await {
            Ok(true) => Some(version),
            Ok(false) => {
                warn!(%package, %version, "Installed secondary module failed its probe, reinstalling");
                None
            }
            Err(e) => {
                warn!(%package, error = %e, "Secondary module probe could not run");
                None
            }
        }
    }

    async fn install(&self, env: &RuntimeEnvironment) -> Result<SecondaryOutcome> {
        let interpreter = env.interpreter();
        let package = &self.config.package;
        let index = self
            .config
            .index_url
            .clone()
            .unwrap_or_else(|| self.primary.pin().index_url.clone());
        info!(%package, %index, "Installing secondary module");
        let request = InstallRequest::new([self.config.requirement()]).index_url(index);
        self.packages.install(interpreter, &request).await?;

        // Resolving the module can drag the primary runtime to another build.
        // The module probe is only meaningful against the pinned one.
        self.primary.reassert(interpreter).await?;

        if !self.probe(env).await? {
            return Ok(SecondaryOutcome::Unavailable {
                reason: "probe failed after install".to_string(),
            });
        }

        let version = self
            .packages
            .installed_version(interpreter, package)
            .await?
            .unwrap_or_else(|| "unknown".to_string());
        info!(%package, %version, "Secondary module installed and verified");
        Ok(SecondaryOutcome::Ready { version })
    }

    async fn probe(&self, env: &RuntimeEnvironment) -> Result<bool> {
        let outcome = self
            .probes
            .run(env.interpreter(), Probe::SecondaryModule)
            .await?;
        if !outcome.passed {
            warn!(detail = %outcome.detail, "Secondary module probe failed");
        }
        Ok(outcome.passed)
    }

    fn record(&self, env: &mut RuntimeEnvironment, version: Option<String>) {
        match &version {
            Some(v) => env.record_version(self.config.package.clone(), v.clone()),
            None => env.forget_version(&self.config.package),
        }
        let Some(mut marker) = read_marker(env) else {
            return;
        };
        if marker.secondary_version == version {
            return;
        }
        marker.secondary_version = version;
        marker.updated_at = chrono::Utc::now();
        if let Err(e) = write_marker(env, &marker) {
            warn!(error = %e, "Failed to update environment marker");
        }
    }
}
