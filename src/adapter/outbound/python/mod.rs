//! Probes run by an environment's own interpreter.
//!
//! Every probe is a separate interpreter process so a crash inside native
//! extension code cannot take the orchestrator down with it.

pub mod scripts;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::command;
use crate::domain::smoke::{SmokeCheck, SmokeResult};
use crate::error::{Error, Result};
use crate::port::outbound::probe::{Probe, ProbeOutcome, ProbeRunner};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct PythonProbes {
    /// Module imported by [`Probe::SecondaryModule`].
    secondary_module: String,
    timeout: Duration,
}

impl PythonProbes {
    #[must_use]
    pub fn new(secondary_module: impl Into<String>) -> Self {
        Self {
            secondary_module: secondary_module.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `script` with `args`; a timeout or non-zero exit is a failed
    /// outcome, a missing interpreter is an error.
    async fn execute(&self, interpreter: &Path, script: &str, args: &[&str]) -> Result<ProbeOutcome> {
        let program = interpreter.display().to_string();
        let mut cmd = Command::new(interpreter);
        cmd.arg("-c").arg(script).args(args);

        match tokio::time::timeout(self.timeout, command::run(&program, &mut cmd)).await {
            Err(_) => Ok(ProbeOutcome::fail(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
            Ok(Ok(output)) => Ok(ProbeOutcome::pass(last_line(&output.stdout))),
            Ok(Err(Error::Command { stderr, .. })) => Ok(ProbeOutcome::fail(stderr)),
            Ok(Err(e)) => Err(e),
        }
    }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[async_trait]
impl ProbeRunner for PythonProbes {
    async fn run(&self, interpreter: &Path, probe: Probe) -> Result<ProbeOutcome> {
        debug!(?probe, interpreter = %interpreter.display(), "Running probe");
        match probe {
            Probe::PrimaryRuntime { on_device } => {
                let device = if on_device { "cuda" } else { "cpu" };
                self.execute(interpreter, scripts::PRIMARY_RUNTIME, &[device])
                    .await
            }
            Probe::SecondaryModule => {
                self.execute(interpreter, scripts::SECONDARY_MODULE, &[&self.secondary_module])
                    .await
            }
            Probe::DeviceAvailable => {
                let outcome = self
                    .execute(interpreter, scripts::DEVICE_AVAILABLE, &[])
                    .await?;
                Ok(match (outcome.passed, outcome.detail.as_str()) {
                    (true, "1") => ProbeOutcome::pass("accelerator available"),
                    (true, _) => ProbeOutcome::fail("accelerator not available"),
                    (false, _) => outcome,
                })
            }
        }
    }

    async fn smoke(&self, interpreter: &Path, check: SmokeCheck) -> Result<SmokeResult> {
        let script = scripts::smoke(check);
        let outcome = self
            .execute(interpreter, &script, &[check.name(), self.secondary_module.as_str()])
            .await?;
        if !outcome.passed {
            return Ok(SmokeResult::failed(check, outcome.detail));
        }
        Ok(serde_json::from_str(&outcome.detail)
            .unwrap_or_else(|e| SmokeResult::failed(check, format!("unreadable result: {e}"))))
    }
}
