//! Extension checkout via `git`.
//!
//! Clones land in a private directory under the scratch root and are renamed
//! into place when complete. A failed clone only ever removes its own
//! scratch copy; whatever a sibling container put at the destination stays.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::command;
use crate::error::Result;
use crate::port::outbound::fetch::SourceControl;

#[derive(Debug, Clone)]
pub struct Git {
    program: PathBuf,
    staging_dir: PathBuf,
}

impl Git {
    #[must_use]
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self::with_program("git", staging_dir)
    }

    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            staging_dir: staging_dir.into(),
        }
    }
}

#[async_trait]
impl SourceControl for Git {
    async fn clone_shallow(&self, url: &str, destination: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("clone.")
            .tempdir_in(&self.staging_dir)?;
        let checkout = scratch.path().join("checkout");

        let program = self.program.display().to_string();
        let mut cmd = Command::new(&self.program);
        cmd.args(["clone", "--depth=1", url])
            .arg(&checkout)
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Err(e) = command::run(&program, &mut cmd).await {
            debug!(url, scratch = %scratch.path().display(), "Discarding partial clone");
            return Err(e);
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::rename(&checkout, destination).await {
            Ok(()) => Ok(()),
            Err(_) if destination.exists() => {
                warn!(
                    url,
                    destination = %destination.display(),
                    "Destination appeared during clone, keeping the existing checkout"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A stand-in for `git` running `body` with the clone target as `$4`.
    fn fake_git(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("git");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn leftovers(staging: &Path) -> usize {
        std::fs::read_dir(staging).map_or(0, |entries| entries.count())
    }

    #[tokio::test]
    async fn clone_is_moved_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_git(dir.path(), "mkdir -p \"$4\" && echo node > \"$4/__init__.py\"");
        let staging = dir.path().join("tmp");
        let destination = dir.path().join("custom_nodes").join("manager");

        Git::with_program(program, &staging)
            .clone_shallow("https://example.com/manager.git", &destination)
            .await
            .unwrap();

        assert!(destination.join("__init__.py").exists());
        assert_eq!(leftovers(&staging), 0);
    }

    #[tokio::test]
    async fn failed_clone_leaves_sibling_checkout_alone() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_git(dir.path(), "mkdir -p \"$4\" && echo partial > \"$4/half\"\nexit 128");
        let staging = dir.path().join("tmp");
        let destination = dir.path().join("custom_nodes").join("manager");
        std::fs::create_dir_all(&destination).unwrap();
        std::fs::write(destination.join("__init__.py"), b"sibling").unwrap();

        let result = Git::with_program(program, &staging)
            .clone_shallow("https://example.com/manager.git", &destination)
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(destination.join("__init__.py")).unwrap(), b"sibling");
        assert!(!destination.join("half").exists());
        assert_eq!(leftovers(&staging), 0);
    }

    #[tokio::test]
    async fn sibling_finishing_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_git(dir.path(), "mkdir -p \"$4\" && echo ours > \"$4/ours\"");
        let staging = dir.path().join("tmp");
        let destination = dir.path().join("custom_nodes").join("manager");
        std::fs::create_dir_all(&destination).unwrap();
        std::fs::write(destination.join("theirs"), b"x").unwrap();

        Git::with_program(program, &staging)
            .clone_shallow("https://example.com/manager.git", &destination)
            .await
            .unwrap();

        assert!(destination.join("theirs").exists());
        assert!(!destination.join("ours").exists());
        assert_eq!(leftovers(&staging), 0);
    }
}
