//! Child processes via `tokio::process`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::service::LaunchSpec;
use crate::error::Result;
use crate::port::outbound::process::{ProcessHandle, ProcessLauncher, SpawnedProcess};

const OUTPUT_BUFFER: usize = 1024;
const TERMINATE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedProcess> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        debug!(pid = ?child.id(), program = %spec.program.display(), "Spawned child");

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        Ok(SpawnedProcess {
            output: rx,
            handle: Box::new(ChildHandle { child }),
        })
    }
}

/// Keep draining after the receiver is gone so the child never blocks on a
/// full pipe.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut open = true;
    while let Ok(Some(line)) = lines.next_line().await {
        if open && tx.send(line).await.is_err() {
            open = false;
        }
    }
}

struct ChildHandle {
    child: Child,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    /// SIGTERM first, SIGKILL once the grace period runs out.
    async fn kill(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        if let Some(pid) = self.child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            // SAFETY: plain signal delivery to our own child.
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
            if tokio::time::timeout(TERMINATE_GRACE, self.child.wait())
                .await
                .is_ok()
            {
                return Ok(());
            }
        }
        self.child.kill().await?;
        Ok(())
    }
}
