//! Functional probes executed inside a runtime environment.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::smoke::{SmokeCheck, SmokeResult};
use crate::error::Result;

/// A functional check run by an environment's interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Import the primary runtime and run a small computation, on the
    /// accelerator when `on_device` is set.
    PrimaryRuntime { on_device: bool },
    /// Import the secondary module and exercise its attention kernel.
    SecondaryModule,
    /// Ask the primary runtime whether an accelerator is usable.
    DeviceAvailable,
}

/// Result of a probe run. A probe that could not start is an `Err`; a probe
/// that ran and failed is `Ok` with `passed == false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub passed: bool,
    /// Last line of output, or the failure reason.
    pub detail: String,
}

impl ProbeOutcome {
    #[must_use]
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Runs probes with a given interpreter.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(&self, interpreter: &Path, probe: Probe) -> Result<ProbeOutcome>;

    /// Run one smoke check and return its structured result.
    ///
    /// # Errors
    ///
    /// Returns an error only when the check could not be executed at all;
    /// check failures are reported inside the result.
    async fn smoke(&self, interpreter: &Path, check: SmokeCheck) -> Result<SmokeResult>;
}
