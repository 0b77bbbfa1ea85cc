//! Segmented downloads with `aria2c`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::{move_into_place, private_staging, staging_name};
use crate::adapter::outbound::command;
use crate::error::Result;
use crate::port::outbound::fetch::Downloader;

#[derive(Debug, Clone)]
pub struct Aria2c {
    program: PathBuf,
    staging_dir: PathBuf,
}

impl Aria2c {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            staging_dir: staging_dir.into(),
        }
    }

    /// Locate `aria2c` on `PATH`.
    #[must_use]
    pub fn detect(staging_dir: impl Into<PathBuf>) -> Option<Self> {
        command::find_on_path("aria2c").map(|program| Self::new(program, staging_dir))
    }
}

#[async_trait]
impl Downloader for Aria2c {
    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        // aria2c keeps a control file next to its output; both live and die
        // with this download's private directory.
        let scratch = private_staging(&self.staging_dir, destination).await?;
        let staged_name = staging_name(destination);

        let mut cmd = Command::new(&self.program);
        cmd.args(["-x", "4", "-s", "4"])
            .args(["--console-log-level=warn", "--summary-interval=0"])
            .arg("-d")
            .arg(scratch.path())
            .arg("-o")
            .arg(&staged_name)
            .arg(url);
        command::run("aria2c", &mut cmd).await?;

        move_into_place(&scratch.path().join(staged_name), destination).await
    }

    fn name(&self) -> &'static str {
        "aria2c"
    }
}
