//! Package tool port: environment creation and package management.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// A single install invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallRequest {
    /// Requirement strings (`torch==2.7.1+cu128`, `xformers`).
    pub requirements: Vec<String>,
    /// Package index to resolve from, replacing the default index.
    pub index_url: Option<String>,
    /// Skip dependency resolution.
    pub no_deps: bool,
    /// Reinstall even when the requirement is already satisfied.
    pub force_reinstall: bool,
}

impl InstallRequest {
    #[must_use]
    pub fn new<I, S>(requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requirements: requirements.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn no_deps(mut self) -> Self {
        self.no_deps = true;
        self
    }

    #[must_use]
    pub fn force_reinstall(mut self) -> Self {
        self.force_reinstall = true;
        self
    }
}

/// Package name of a requirement string (`torchvision==0.22` -> `torchvision`).
#[must_use]
pub fn requirement_name(requirement: &str) -> &str {
    let end = requirement
        .find(|c: char| matches!(c, '=' | '<' | '>' | '~' | '!' | '[' | ';' | ' ' | '@'))
        .unwrap_or(requirement.len());
    requirement[..end].trim()
}

/// Manages interpreter environments and the packages inside them.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Create a fresh environment at `path` with the requested interpreter.
    async fn create_environment(&self, path: &Path, python: &str) -> Result<()>;

    /// Upgrade the environment's own packaging tool.
    async fn upgrade_packaging(&self, interpreter: &Path) -> Result<()>;

    /// Installed version of `package`, or `None` when absent.
    async fn installed_version(&self, interpreter: &Path, package: &str) -> Result<Option<String>>;

    async fn install(&self, interpreter: &Path, request: &InstallRequest) -> Result<()>;

    /// Remove packages; names that are not installed are ignored.
    async fn uninstall(&self, interpreter: &Path, packages: &[String]) -> Result<()>;

    async fn install_requirements_file(&self, interpreter: &Path, file: &Path) -> Result<()>;
}

/// Where an interpreter expects its executables, for callers building `PATH`.
#[must_use]
pub fn bin_dir_of(interpreter: &Path) -> PathBuf {
    interpreter
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_names() {
        assert_eq!(requirement_name("torch==2.7.1+cu128"), "torch");
        assert_eq!(requirement_name("xformers"), "xformers");
        assert_eq!(requirement_name("torchvision>=0.20"), "torchvision");
        assert_eq!(requirement_name("opencv-python[contrib]"), "opencv-python");
    }

    #[test]
    fn request_builder() {
        let request = InstallRequest::new(["torch==2.7.1+cu128"])
            .index_url("https://download.pytorch.org/whl/cu128")
            .no_deps()
            .force_reinstall();
        assert!(request.no_deps && request.force_reinstall);
        assert_eq!(request.requirements, vec!["torch==2.7.1+cu128"]);
    }
}
