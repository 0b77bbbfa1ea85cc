//! Child process management for the served application.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::service::LaunchSpec;
use crate::error::Result;

/// Control over a running child.
#[async_trait]
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Wait for exit. Returns the exit code, or `None` when the process was
    /// terminated by a signal.
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Terminate the process and reap it.
    async fn kill(&mut self) -> Result<()>;
}

/// A freshly started child.
pub struct SpawnedProcess {
    /// Combined stdout/stderr, one line per message. Closed when both
    /// streams reach end of file.
    pub output: mpsc::Receiver<String>,
    pub handle: Box<dyn ProcessHandle>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.handle.id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedProcess>;
}
