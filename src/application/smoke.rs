//! Accelerator smoke test suite.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::environment::RuntimeEnvironment;
use crate::domain::gpu::GpuProfile;
use crate::domain::smoke::{SmokeCheck, SmokeReport, SmokeResult, SmokeStatus};
use crate::error::Result;
use crate::port::outbound::probe::ProbeRunner;

pub struct SmokeSuite {
    probes: Arc<dyn ProbeRunner>,
}

impl SmokeSuite {
    #[must_use]
    pub fn new(probes: Arc<dyn ProbeRunner>) -> Self {
        Self { probes }
    }

    /// Run every check in order and write the report under `out_dir`.
    ///
    /// A check that cannot be executed is recorded as failed; the suite
    /// always runs to the end.
    ///
    /// # Errors
    ///
    /// Returns an error only when the report cannot be written.
    pub async fn run(
        &self,
        env: &RuntimeEnvironment,
        profile: &GpuProfile,
        out_dir: &Path,
    ) -> Result<(SmokeReport, PathBuf)> {
        let mut tests = Vec::with_capacity(SmokeCheck::ALL.len());
        for check in SmokeCheck::ALL {
            let result = match self.probes.smoke(env.interpreter(), check).await {
                Ok(result) => result,
                Err(e) => SmokeResult::failed(check, e.to_string()),
            };
            match result.status {
                SmokeStatus::Fail => warn!(check = %check, details = %result.details, "Smoke check failed"),
                status => info!(check = %check, ?status, "Smoke check finished"),
            }
            tests.push(result);
        }

        let report = SmokeReport {
            timestamp: Utc::now(),
            gpu_info: profile.device().cloned(),
            architecture: env.architecture(),
            tests,
        };

        tokio::fs::create_dir_all(out_dir).await?;
        let path = out_dir.join(report.file_name());
        tokio::fs::write(&path, serde_json::to_vec_pretty(&report)?).await?;
        info!(
            path = %path.display(),
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Smoke report written"
        );
        Ok((report, path))
    }
}
