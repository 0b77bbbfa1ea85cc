//! Per-architecture runtime environments on the shared volume.
//!
//! Creation and purge run under the environment's install lock, so a
//! container never deletes a directory a sibling is still populating.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::lock::FileLock;

use crate::domain::environment::{EnvironmentMarker, RuntimeEnvironment};
use crate::domain::gpu::ArchitectureClass;
use crate::error::{BootError, Result};
use crate::port::outbound::package::PackageManager;

/// What happened to the compatibility alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasUpdate {
    Created,
    Repointed,
    Unchanged,
    /// A real directory occupies the alias path and was left alone.
    Blocked,
}

/// Resolves an architecture class to a working environment.
pub struct EnvironmentRegistry {
    root: PathBuf,
    alias: PathBuf,
    python: String,
    packages: Arc<dyn PackageManager>,
    lock_timeout: Duration,
    lock_poll: Duration,
}

impl EnvironmentRegistry {
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        alias: impl Into<PathBuf>,
        python: impl Into<String>,
        packages: Arc<dyn PackageManager>,
    ) -> Self {
        Self {
            root: root.into(),
            alias: alias.into(),
            python: python.into(),
            packages,
            lock_timeout: Duration::from_secs(300),
            lock_poll: Duration::from_secs(5),
        }
    }

    /// Tune the lock taken while creating or purging an environment.
    #[must_use]
    pub fn with_lock(mut self, timeout: Duration, poll: Duration) -> Self {
        self.lock_timeout = timeout;
        self.lock_poll = poll;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn alias(&self) -> &Path {
        &self.alias
    }

    /// Environment handle for `class`, whether or not it exists yet.
    #[must_use]
    pub fn locate(&self, class: ArchitectureClass) -> RuntimeEnvironment {
        RuntimeEnvironment::new(self.root.join(class.as_str()), class)
    }

    /// Return a usable environment for `class`, creating it when needed.
    ///
    /// A directory without an executable interpreter is a leftover from an
    /// interrupted creation and is purged first. Both happen under the
    /// environment lock; the interpreter is checked again once it is held.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::EnvironmentCreation`] when the directory cannot be
    /// prepared or the package tool fails to create the environment, and
    /// [`BootError::Lock`] on lock IO failure.
    pub async fn ensure(&self, class: ArchitectureClass) -> Result<RuntimeEnvironment> {
        let env = self.locate(class);

        if env.has_interpreter() {
            info!(path = %env.path().display(), architecture = %class, "Reusing environment");
            return Ok(env);
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| creation_error(&env, e.to_string()))?;
        let lock = FileLock::for_environment(&env, self.lock_timeout, self.lock_poll);
        let held = lock.acquire(self.lock_timeout).await?;

        if env.has_interpreter() {
            info!(path = %env.path().display(), architecture = %class, "Environment created by a sibling while waiting");
            lock.release(held);
            return Ok(env);
        }
        self.create(&env).await?;
        lock.release(held);
        Ok(env)
    }

    async fn create(&self, env: &RuntimeEnvironment) -> Result<()> {
        if env.path().exists() {
            warn!(
                path = %env.path().display(),
                "Environment has no working interpreter, recreating"
            );
            tokio::fs::remove_dir_all(env.path())
                .await
                .map_err(|e| creation_error(env, e.to_string()))?;
        }

        info!(path = %env.path().display(), python = %self.python, "Creating environment");
        self.packages
            .create_environment(env.path(), &self.python)
            .await
            .map_err(|e| creation_error(env, e.to_string()))?;

        if !env.has_interpreter() {
            return Err(creation_error(env, "interpreter missing after creation".to_string()));
        }

        if let Err(e) = self.packages.upgrade_packaging(env.interpreter()).await {
            warn!(error = %e, "Failed to upgrade packaging tool, continuing");
        }
        Ok(())
    }

    /// Point the compatibility alias at `env`.
    ///
    /// The new link is built beside the alias and renamed over it, so readers
    /// always see either the old target or the new one.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the symlink cannot be replaced.
    pub fn point_alias(&self, env: &RuntimeEnvironment) -> Result<AliasUpdate> {
        let target = env.path();
        let update = match std::fs::symlink_metadata(&self.alias) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AliasUpdate::Created,
            Err(e) => return Err(e.into()),
            Ok(meta) if meta.file_type().is_symlink() => {
                if std::fs::read_link(&self.alias)? == target {
                    return Ok(AliasUpdate::Unchanged);
                }
                AliasUpdate::Repointed
            }
            Ok(_) => {
                warn!(
                    alias = %self.alias.display(),
                    "Alias path is a real directory or file, leaving it untouched"
                );
                return Ok(AliasUpdate::Blocked);
            }
        };

        if let Some(parent) = self.alias.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staged = staging_sibling(&self.alias);
        std::os::unix::fs::symlink(target, &staged)?;
        if let Err(e) = std::fs::rename(&staged, &self.alias) {
            let _ = std::fs::remove_file(&staged);
            return Err(e.into());
        }
        info!(alias = %self.alias.display(), target = %target.display(), ?update, "Alias updated");
        Ok(update)
    }

    /// Current alias target, if the alias is a symlink.
    #[must_use]
    pub fn alias_target(&self) -> Option<PathBuf> {
        std::fs::read_link(&self.alias).ok()
    }
}

fn creation_error(env: &RuntimeEnvironment, reason: String) -> crate::error::Error {
    BootError::EnvironmentCreation {
        path: env.path().to_path_buf(),
        reason,
    }
    .into()
}

/// Read the marker of the last verified install, if present and readable.
#[must_use]
pub fn read_marker(env: &RuntimeEnvironment) -> Option<EnvironmentMarker> {
    let content = std::fs::read_to_string(env.marker_path()).ok()?;
    match serde_json::from_str(&content) {
        Ok(marker) => Some(marker),
        Err(e) => {
            warn!(path = %env.marker_path().display(), error = %e, "Ignoring unreadable marker");
            None
        }
    }
}

/// Write the marker atomically (private temp file + rename).
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_marker(env: &RuntimeEnvironment, marker: &EnvironmentMarker) -> Result<()> {
    let path = env.marker_path();
    let dir = path.parent().unwrap_or(env.path());
    let mut staged = tempfile::Builder::new()
        .prefix(".marker.")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    staged.write_all(&serde_json::to_vec_pretty(marker)?)?;
    staged.persist(&path).map_err(|e| e.error)?;
    Ok(())
}

/// A name beside `path` no other process or call will pick.
fn staging_sibling(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let name = path
        .file_name()
        .map_or_else(|| "alias".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(
        ".{name}.{}.{}.tmp",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ))
}
