//! Hardware query port.

use async_trait::async_trait;

use crate::domain::gpu::GpuInfo;
use crate::error::Result;

/// Reads the primary accelerator's identity.
#[async_trait]
pub trait HardwareQuery: Send + Sync {
    /// Return the primary accelerator, or `None` when there is none or the
    /// query tool itself is unavailable.
    ///
    /// # Errors
    ///
    /// Implementations should prefer `Ok(None)` over errors; an error is
    /// treated the same as absence by the orchestrator.
    async fn primary_device(&self) -> Result<Option<GpuInfo>>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}
