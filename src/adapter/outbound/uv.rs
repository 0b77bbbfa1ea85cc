//! Package management through `uv`.
//!
//! Environments are created with `uv venv` and managed with `uv pip`
//! pointed at the environment's interpreter. The cache and scratch
//! directories live on the shared volume so repeated boots reuse wheels.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::command;
use crate::error::Result;
use crate::port::outbound::package::{InstallRequest, PackageManager};

/// Prints the installed version of `argv[1]`, or nothing when absent.
const VERSION_SCRIPT: &str = "\
import importlib.metadata as m, sys
try:
    print(m.version(sys.argv[1]))
except m.PackageNotFoundError:
    pass
";

#[derive(Debug, Clone)]
pub struct Uv {
    program: String,
    cache_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl Uv {
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "uv".to_string(),
            cache_dir: cache_dir.into(),
            tmp_dir: tmp_dir.into(),
        }
    }

    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("UV_CACHE_DIR", &self.cache_dir)
            .env("TMPDIR", &self.tmp_dir)
            .env("UV_LINK_MODE", "copy")
            .env("UV_NO_PROGRESS", "1");
        cmd
    }

    fn pip(&self, subcommand: &str, interpreter: &Path) -> Command {
        let mut cmd = self.command();
        cmd.arg("pip").arg(subcommand).arg("--python").arg(interpreter);
        cmd
    }
}

/// Arguments after `uv pip install --python <interp>`.
#[must_use]
pub fn install_args(request: &InstallRequest) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(index) = &request.index_url {
        args.push("--index-url".to_string());
        args.push(index.clone());
    }
    if request.no_deps {
        args.push("--no-deps".to_string());
    }
    if request.force_reinstall {
        args.push("--reinstall".to_string());
    }
    args.extend(request.requirements.iter().cloned());
    args
}

#[async_trait]
impl PackageManager for Uv {
    async fn create_environment(&self, path: &Path, python: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("venv").arg("--seed").arg("--python").arg(python).arg(path);
        command::run(&self.program, &mut cmd).await?;
        Ok(())
    }

    async fn upgrade_packaging(&self, interpreter: &Path) -> Result<()> {
        let mut cmd = self.pip("install", interpreter);
        cmd.args(["--upgrade", "pip"]);
        command::run(&self.program, &mut cmd).await?;
        Ok(())
    }

    async fn installed_version(&self, interpreter: &Path, package: &str) -> Result<Option<String>> {
        let program = interpreter.display().to_string();
        let mut cmd = Command::new(interpreter);
        cmd.arg("-c").arg(VERSION_SCRIPT).arg(package);
        let output = command::run(&program, &mut cmd).await?;
        let version = output.stdout.trim();
        Ok((!version.is_empty()).then(|| version.to_string()))
    }

    async fn install(&self, interpreter: &Path, request: &InstallRequest) -> Result<()> {
        let mut cmd = self.pip("install", interpreter);
        cmd.args(install_args(request));
        command::run(&self.program, &mut cmd).await?;
        Ok(())
    }

    async fn uninstall(&self, interpreter: &Path, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut cmd = self.pip("uninstall", interpreter);
        cmd.args(packages);
        command::run(&self.program, &mut cmd).await?;
        Ok(())
    }

    async fn install_requirements_file(&self, interpreter: &Path, file: &Path) -> Result<()> {
        let mut cmd = self.pip("install", interpreter);
        cmd.arg("-r").arg(file);
        command::run(&self.program, &mut cmd).await?;
        Ok(())
    }
}
