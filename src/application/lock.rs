//! Advisory install lock shared by containers mounting the same volume.
//!
//! The lock is a JSON record created with `O_EXCL` next to the environment it
//! guards. A record whose holder process is gone (same host) or whose age has
//! reached the staleness threshold is evicted. Two waiters can evict the same
//! stale record at nearly the same time; the exclusive create still lets
//! only one of them win the next acquisition, and the loser keeps waiting.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::environment::RuntimeEnvironment;
use crate::error::{BootError, Result};

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    /// Environment the holder is installing into.
    pub environment: PathBuf,
}

impl LockRecord {
    fn current(environment: &Path) -> Self {
        Self {
            pid: std::process::id(),
            hostname: hostname(),
            acquired_at: Utc::now(),
            environment: environment.to_path_buf(),
        }
    }

    /// Time since acquisition; a clock skewed into the future reads as zero.
    #[must_use]
    pub fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }

    /// False only when the holder ran on this host and its process is gone.
    #[must_use]
    pub fn is_holder_alive(&self) -> bool {
        if self.hostname != hostname() {
            return true;
        }
        Path::new(&format!("/proc/{}", self.pid)).exists()
    }
}

/// Why a held lock may be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Expired,
    HolderGone,
}

/// Advisory lock guarding one environment's install critical section.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    environment: PathBuf,
    stale_after: Duration,
    poll_interval: Duration,
}

impl FileLock {
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        environment: impl Into<PathBuf>,
        stale_after: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            environment: environment.into(),
            stale_after,
            poll_interval,
        }
    }

    /// Lock for `env`, stored beside it as `<env>.lock` so purging the
    /// environment directory never removes a held lock.
    #[must_use]
    pub fn for_environment(env: &RuntimeEnvironment, stale_after: Duration, poll: Duration) -> Self {
        Self::new(lock_path(env.path()), env.path(), stale_after, poll)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current holder, if any and readable.
    #[must_use]
    pub fn holder(&self) -> Option<LockRecord> {
        read_record(&self.path)
    }

    /// Whether the current lock file may be evicted right now.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.staleness() != Staleness::Fresh
    }

    fn staleness(&self) -> Staleness {
        match read_record(&self.path) {
            Some(record) if !record.is_holder_alive() => Staleness::HolderGone,
            Some(record) if record.age() >= self.stale_after => Staleness::Expired,
            Some(_) => Staleness::Fresh,
            // Half-written or foreign content: fall back to file age.
            None => match file_age(&self.path) {
                Some(age) if age >= self.stale_after => Staleness::Expired,
                _ => Staleness::Fresh,
            },
        }
    }

    /// Acquire the lock, waiting up to `timeout` for a fresh holder.
    ///
    /// Stale holders are evicted immediately. A holder still present once
    /// `timeout` has elapsed is evicted as well.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::Lock`] when the lock file cannot be created or
    /// removed.
    pub async fn acquire(&self, timeout: Duration) -> Result<LockGuard> {
        let mut deadline = Instant::now() + timeout;
        let mut announced = false;

        loop {
            match self.try_create() {
                Ok(record) => {
                    debug!(path = %self.path.display(), "Install lock acquired");
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        record,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(self.lock_error(e)),
            }

            let observed = read_record(&self.path);
            match self.staleness() {
                Staleness::HolderGone => {
                    warn!(
                        path = %self.path.display(),
                        pid = observed.as_ref().map(|r| r.pid),
                        "Evicting install lock, holder process is gone"
                    );
                    self.evict(observed.as_ref())?;
                    continue;
                }
                Staleness::Expired => {
                    warn!(
                        path = %self.path.display(),
                        age_secs = observed.as_ref().map(|r| r.age().as_secs()),
                        "Evicting stale install lock"
                    );
                    self.evict(observed.as_ref())?;
                    continue;
                }
                Staleness::Fresh => {}
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    path = %self.path.display(),
                    waited_secs = timeout.as_secs(),
                    "Install lock still held after timeout, evicting"
                );
                self.evict(observed.as_ref())?;
                // A sibling may win the re-create; give it a full window.
                deadline = Instant::now() + timeout;
                continue;
            }

            if !announced {
                info!(
                    path = %self.path.display(),
                    holder_pid = observed.as_ref().map(|r| r.pid),
                    holder_host = observed.as_ref().map(|r| r.hostname.as_str()),
                    "Waiting for install lock"
                );
                announced = true;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Release a guard explicitly. Equivalent to dropping it.
    pub fn release(&self, guard: LockGuard) {
        guard.release();
    }

    fn try_create(&self) -> std::io::Result<LockRecord> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let record = LockRecord::current(&self.environment);
        let json = serde_json::to_vec(&record)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(record)
    }

    /// Remove the lock file unless it changed hands since `observed` was read.
    fn evict(&self, observed: Option<&LockRecord>) -> Result<()> {
        if observed.is_some() && read_record(&self.path).as_ref() != observed {
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.lock_error(e)),
        }
    }

    fn lock_error(&self, e: std::io::Error) -> crate::error::Error {
        BootError::Lock {
            path: self.path.clone(),
            reason: e.to_string(),
        }
        .into()
    }
}

/// Held lock; the file is removed when the guard is released or dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl LockGuard {
    #[must_use]
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        // Never delete a lock that was evicted and re-taken by someone else.
        if read_record(&self.path).as_ref() != Some(&self.record) {
            warn!(path = %self.path.display(), "Install lock changed hands before release");
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove install lock");
        } else {
            debug!(path = %self.path.display(), "Install lock released");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.remove();
    }
}

/// `<env>.lock` beside the environment directory.
#[must_use]
pub fn lock_path(environment: &Path) -> PathBuf {
    let mut name = environment
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    environment.with_file_name(name)
}

fn read_record(path: &Path) -> Option<LockRecord> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}
