//! Long-lived service supervision.
//!
//! The supervisor forwards every output line to the service log stream and
//! watches for `No module named '<m>'`. An allowlisted module is installed
//! into the environment and the service relaunched, a bounded number of
//! times. Anything else is left running as it is.
//!
//! An install can move the primary runtime off its pinned build. When the
//! supervisor guards the primary, each install runs under the environment
//! lock and is followed by a restore and re-verify; a primary that cannot be
//! put back is never relaunched on.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::install::PrimaryGuard;
use super::lock::FileLock;
use crate::domain::environment::RuntimeEnvironment;
use crate::domain::service::{missing_module, LaunchSpec};
use crate::error::{Error, Result};
use crate::infrastructure::config::logging::SERVICE_TARGET;
use crate::infrastructure::config::service::ServiceConfig;
use crate::port::outbound::package::{InstallRequest, PackageManager};
use crate::port::outbound::process::{ProcessLauncher, SpawnedProcess};

/// Time allowed for the output readers to flush after the process exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// When and what the supervisor may repair by relaunching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub delay: Duration,
    pub allowlist: Vec<String>,
}

impl RestartPolicy {
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            delay: config.restart_delay(),
            allowlist: config.auto_install_allowlist.clone(),
        }
    }

    /// Never relaunch.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_restarts: 0,
            delay: Duration::ZERO,
            allowlist: Vec::new(),
        }
    }

    #[must_use]
    pub fn allows(&self, module: &str) -> bool {
        self.allowlist.iter().any(|m| m == module)
    }
}

/// How the supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceExit {
    /// Exit code of the final process; `None` when killed by a signal.
    pub code: Option<i32>,
    pub restarts: u32,
    /// Stopped on request rather than by itself.
    pub stopped: bool,
}

impl ServiceExit {
    #[must_use]
    pub fn success(&self) -> bool {
        self.stopped || self.code == Some(0)
    }
}

pub struct ServiceSupervisor {
    name: String,
    launcher: Arc<dyn ProcessLauncher>,
    packages: Arc<dyn PackageManager>,
    interpreter: PathBuf,
    spec: LaunchSpec,
    policy: RestartPolicy,
    primary: Option<(PrimaryGuard, FileLock)>,
}

impl ServiceSupervisor {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        launcher: Arc<dyn ProcessLauncher>,
        packages: Arc<dyn PackageManager>,
        interpreter: impl Into<PathBuf>,
        spec: LaunchSpec,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            launcher,
            packages,
            interpreter: interpreter.into(),
            spec,
            policy,
            primary: None,
        }
    }

    /// Hold `env` to its pinned primary runtime across module installs.
    #[must_use]
    pub fn guard_primary(mut self, guard: PrimaryGuard, env: &RuntimeEnvironment) -> Self {
        let lock = guard.lock(env);
        self.primary = Some((guard, lock));
        self
    }

    /// Spawn the process and hand it to a background supervision task.
    ///
    /// # Errors
    ///
    /// Returns an error when the first spawn fails.
    pub async fn start(self) -> Result<RunningService> {
        let child = self.launcher.spawn(&self.spec).await?;
        let pid = child.handle.id();
        info!(
            target: SERVICE_TARGET,
            service = %self.name,
            pid = ?pid,
            argv = ?self.spec.argv(),
            "Service started"
        );

        let (pid_tx, pid_rx) = watch::channel(pid);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = self.name.clone();
        let task = tokio::spawn(self.supervise(child, shutdown_rx, pid_tx));

        Ok(RunningService {
            name,
            pid: pid_rx,
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn supervise(
        self,
        mut child: SpawnedProcess,
        mut shutdown: watch::Receiver<bool>,
        pid: watch::Sender<Option<u32>>,
    ) -> Result<ServiceExit> {
        let mut restarts = 0;
        let mut attempted = HashSet::new();

        loop {
            match self
                .watch(&mut child, &mut shutdown, restarts, &mut attempted)
                .await?
            {
                Step::Stopped => {
                    info!(target: SERVICE_TARGET, service = %self.name, "Service stopped");
                    return Ok(ServiceExit {
                        code: None,
                        restarts,
                        stopped: true,
                    });
                }
                Step::Exited(code) => {
                    let exit = ServiceExit {
                        code,
                        restarts,
                        stopped: false,
                    };
                    if exit.success() {
                        info!(target: SERVICE_TARGET, service = %self.name, "Service exited");
                    } else {
                        error!(target: SERVICE_TARGET, service = %self.name, code = ?code, "Service exited unsuccessfully");
                    }
                    return Ok(exit);
                }
                Step::Restart { module, exited } => {
                    warn!(
                        target: SERVICE_TARGET,
                        service = %self.name,
                        %module,
                        attempt = restarts + 1,
                        max = self.policy.max_restarts,
                        "Service is missing a module, installing it"
                    );
                    if let Err(e) = self.install_module(&module).await {
                        error!(
                            target: SERVICE_TARGET,
                            service = %self.name,
                            %module,
                            error = %e,
                            "Module install failed, not relaunching"
                        );
                        if let Some(code) = exited {
                            return Ok(ServiceExit {
                                code,
                                restarts,
                                stopped: false,
                            });
                        }
                        continue;
                    }

                    child.handle.kill().await?;
                    tokio::time::sleep(self.policy.delay).await;
                    child = self.launcher.spawn(&self.spec).await?;
                    restarts += 1;
                    pid.send_replace(child.handle.id());
                    info!(
                        target: SERVICE_TARGET,
                        service = %self.name,
                        pid = ?child.handle.id(),
                        restarts,
                        "Service relaunched"
                    );
                }
            }
        }
    }

    async fn install_module(&self, module: &str) -> Result<()> {
        let request = InstallRequest::new([module.to_string()]);
        let Some((guard, lock)) = &self.primary else {
            return self.packages.install(&self.interpreter, &request).await;
        };

        let held = lock.acquire(guard.lock_timeout()).await?;
        let installed = self.packages.install(&self.interpreter, &request).await;
        // Runs even when the install failed: a resolver can fail halfway
        // through swapping packages.
        let primary = guard.reassert(&self.interpreter).await;
        lock.release(held);

        if primary? {
            warn!(
                target: SERVICE_TARGET,
                %module,
                version = %guard.pin().full_version(),
                "Restored pinned primary runtime after module install"
            );
        }
        installed
    }

    /// Follow one process until it exits, is stopped, or needs a relaunch.
    async fn watch(
        &self,
        child: &mut SpawnedProcess,
        shutdown: &mut watch::Receiver<bool>,
        restarts: u32,
        attempted: &mut HashSet<String>,
    ) -> Result<Step> {
        let mut output_open = true;
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        child.handle.kill().await?;
                        return Ok(Step::Stopped);
                    }
                }
                line = child.output.recv(), if output_open => match line {
                    Some(line) => {
                        if let Some(module) = self.inspect(&line, restarts, attempted) {
                            return Ok(Step::Restart { module, exited: None });
                        }
                    }
                    None => output_open = false,
                },
                code = child.handle.wait() => {
                    let code = code?;
                    if let Some(module) = self.drain(child, restarts, attempted).await {
                        return Ok(Step::Restart { module, exited: Some(code) });
                    }
                    return Ok(Step::Exited(code));
                }
            }
        }
    }

    /// Log lines still buffered after exit; a crash on import usually
    /// prints its reason last.
    async fn drain(
        &self,
        child: &mut SpawnedProcess,
        restarts: u32,
        attempted: &mut HashSet<String>,
    ) -> Option<String> {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        let mut found = None;
        while let Ok(Some(line)) = tokio::time::timeout_at(deadline, child.output.recv()).await {
            if found.is_none() {
                found = self.inspect(&line, restarts, attempted);
            } else {
                info!(target: SERVICE_TARGET, "{line}");
            }
        }
        found
    }

    fn inspect(&self, line: &str, restarts: u32, attempted: &mut HashSet<String>) -> Option<String> {
        info!(target: SERVICE_TARGET, "{line}");
        let module = missing_module(line)?;
        if !self.policy.allows(module) {
            error!(target: SERVICE_TARGET, %module, "Missing module is not on the auto-install allowlist");
            return None;
        }
        if restarts >= self.policy.max_restarts {
            error!(
                target: SERVICE_TARGET,
                %module,
                max = self.policy.max_restarts,
                "Restart limit reached, leaving service as it is"
            );
            return None;
        }
        if !attempted.insert(module.to_string()) {
            error!(target: SERVICE_TARGET, %module, "Module still missing after install");
            return None;
        }
        Some(module.to_string())
    }
}

enum Step {
    Stopped,
    Exited(Option<i32>),
    Restart {
        module: String,
        /// Set when the process had already exited.
        exited: Option<Option<i32>>,
    },
}

/// Handle to a supervised service.
pub struct RunningService {
    name: String,
    pid: watch::Receiver<Option<u32>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<ServiceExit>>,
}

impl RunningService {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pid of the current process (changes across relaunches).
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        *self.pid.borrow()
    }

    /// Wait for the service to end on its own.
    ///
    /// # Errors
    ///
    /// Returns an error when supervision failed (relaunch spawn failure or a
    /// panicked task).
    pub async fn wait(&mut self) -> Result<ServiceExit> {
        join(&mut self.task).await
    }

    /// Terminate the service and wait for supervision to finish.
    ///
    /// # Errors
    ///
    /// See [`RunningService::wait`].
    pub async fn shutdown(mut self) -> Result<ServiceExit> {
        info!(service = %self.name, "Stopping service");
        let _ = self.shutdown.send(true);
        join(&mut self.task).await
    }
}

impl std::fmt::Debug for RunningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningService")
            .field("name", &self.name)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

async fn join(task: &mut JoinHandle<Result<ServiceExit>>) -> Result<ServiceExit> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(Error::Io(std::io::Error::other(format!(
            "service supervision task failed: {e}"
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::install::InstallPlan;
    use crate::domain::environment::RuntimePin;
    use crate::domain::gpu::ArchitectureClass;
    use crate::testkit::fakes::{FakeLauncher, FakePackageManager, FakeProbes, Script};

    fn policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            max_restarts,
            delay: Duration::ZERO,
            allowlist: vec!["torchsde".into(), "kornia".into()],
        }
    }

    fn supervisor(
        launcher: Arc<FakeLauncher>,
        packages: Arc<FakePackageManager>,
        policy: RestartPolicy,
    ) -> ServiceSupervisor {
        ServiceSupervisor::new(
            "comfyui",
            launcher,
            packages,
            "/vol/envs/ada/bin/python",
            LaunchSpec::new("/vol/envs/ada/bin/python").arg("main.py"),
            policy,
        )
    }

    fn missing(module: &str) -> Script {
        Script::exits(1).line(format!("ModuleNotFoundError: No module named '{module}'"))
    }

    #[tokio::test]
    async fn clean_exit_is_reported() {
        let launcher = Arc::new(FakeLauncher::new([Script::exits(0).line("Starting server")]));
        let mut service = supervisor(launcher.clone(), Arc::new(FakePackageManager::new()), policy(3))
            .start()
            .await
            .unwrap();

        let exit = service.wait().await.unwrap();
        assert_eq!(exit.code, Some(0));
        assert!(exit.success());
        assert_eq!(exit.restarts, 0);
        assert_eq!(launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn installs_allowlisted_module_and_relaunches() {
        let launcher = Arc::new(FakeLauncher::new([missing("torchsde"), Script::exits(0)]));
        let packages = Arc::new(FakePackageManager::new());
        let mut service = supervisor(launcher.clone(), packages.clone(), policy(3))
            .start()
            .await
            .unwrap();

        let exit = service.wait().await.unwrap();
        assert_eq!(exit.restarts, 1);
        assert_eq!(exit.code, Some(0));
        assert_eq!(launcher.spawn_count(), 2);
        assert_eq!(packages.install_calls()[0].requirements, vec!["torchsde"]);
    }

    #[tokio::test]
    async fn restarts_are_bounded() {
        let launcher = Arc::new(FakeLauncher::new([
            missing("torchsde"),
            missing("kornia"),
            missing("torchsde"),
        ]));
        let packages = Arc::new(FakePackageManager::new());
        let mut service = supervisor(launcher.clone(), packages.clone(), policy(1))
            .start()
            .await
            .unwrap();

        let exit = service.wait().await.unwrap();
        assert_eq!(exit.restarts, 1);
        assert_eq!(exit.code, Some(1));
        assert!(!exit.success());
        assert_eq!(launcher.spawn_count(), 2);
        assert_eq!(packages.install_calls().len(), 1);
    }

    #[tokio::test]
    async fn same_module_is_not_retried() {
        let launcher = Arc::new(FakeLauncher::new([missing("torchsde"), missing("torchsde")]));
        let mut service = supervisor(launcher.clone(), Arc::new(FakePackageManager::new()), policy(5))
            .start()
            .await
            .unwrap();

        let exit = service.wait().await.unwrap();
        assert_eq!(exit.restarts, 1);
        assert_eq!(launcher.spawn_count(), 2);
    }

    #[tokio::test]
    async fn module_outside_allowlist_is_left_alone() {
        let launcher = Arc::new(FakeLauncher::new([missing("onnxruntime")]));
        let packages = Arc::new(FakePackageManager::new());
        let mut service = supervisor(launcher.clone(), packages.clone(), policy(3))
            .start()
            .await
            .unwrap();

        let exit = service.wait().await.unwrap();
        assert_eq!(exit.code, Some(1));
        assert_eq!(launcher.spawn_count(), 1);
        assert!(packages.install_calls().is_empty());
    }

    #[tokio::test]
    async fn failed_install_keeps_exit_code() {
        let launcher = Arc::new(FakeLauncher::new([missing("kornia")]));
        let packages = Arc::new(FakePackageManager::new().fail_install_of("kornia"));
        let mut service = supervisor(launcher.clone(), packages, policy(3))
            .start()
            .await
            .unwrap();

        let exit = service.wait().await.unwrap();
        assert_eq!(exit.code, Some(1));
        assert_eq!(exit.restarts, 0);
        assert_eq!(launcher.spawn_count(), 1);
    }

    fn guarded(
        launcher: Arc<FakeLauncher>,
        packages: Arc<FakePackageManager>,
    ) -> (tempfile::TempDir, RuntimeEnvironment, ServiceSupervisor) {
        let dir = tempfile::tempdir().unwrap();
        let env = RuntimeEnvironment::new(dir.path().join("ada"), ArchitectureClass::Ada);
        packages.set_installed(env.interpreter(), "torch", "2.5.1+cu124");
        let plan = InstallPlan {
            package: "torch".into(),
            companions: Vec::new(),
            conflicting: Vec::new(),
            lock_timeout: Duration::from_secs(5),
            lock_poll: Duration::from_millis(10),
        };
        let pin = RuntimePin {
            version: "2.5.1".into(),
            toolchain: "cu124".into(),
            index_url: "https://download.pytorch.org/whl/cu124".into(),
        };
        let guard = PrimaryGuard::new(packages.clone(), Arc::new(FakeProbes::passing()), plan, pin, true);
        let supervisor = ServiceSupervisor::new(
            "comfyui",
            launcher,
            packages,
            env.interpreter(),
            LaunchSpec::new(env.interpreter()).arg("main.py"),
            policy(3),
        )
        .guard_primary(guard, &env);
        (dir, env, supervisor)
    }

    #[tokio::test]
    async fn module_install_restores_moved_primary_before_relaunch() {
        let launcher = Arc::new(FakeLauncher::new([missing("torchsde"), Script::exits(0)]));
        let packages = Arc::new(
            FakePackageManager::new().bump_on_install("torchsde", "torch", "2.6.0+cu126"),
        );
        let (dir, env, supervisor) = guarded(launcher.clone(), packages.clone());

        let exit = supervisor.start().await.unwrap().wait().await.unwrap();

        assert_eq!(exit.restarts, 1);
        assert_eq!(launcher.spawn_count(), 2);
        let installs = packages.install_calls();
        assert_eq!(installs.len(), 2);
        assert!(installs[1].no_deps && installs[1].force_reinstall);
        assert_eq!(
            packages.version_of(env.interpreter(), "torch").as_deref(),
            Some("2.5.1+cu124")
        );
        assert!(!dir.path().join("ada.lock").exists());
    }

    #[tokio::test]
    async fn unrestorable_primary_is_not_relaunched() {
        let launcher = Arc::new(FakeLauncher::new([missing("torchsde"), Script::exits(0)]));
        let packages = Arc::new(
            FakePackageManager::new()
                .bump_on_install("torchsde", "torch", "2.6.0+cu126")
                .fail_install_of("torch"),
        );
        let (_dir, _env, supervisor) = guarded(launcher.clone(), packages);

        let exit = supervisor.start().await.unwrap().wait().await.unwrap();

        assert_eq!(exit.code, Some(1));
        assert_eq!(exit.restarts, 0);
        assert_eq!(launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_kills_running_service() {
        let launcher = Arc::new(FakeLauncher::new([Script::runs_forever().line("Starting server")]));
        let service = supervisor(launcher.clone(), Arc::new(FakePackageManager::new()), RestartPolicy::none())
            .start()
            .await
            .unwrap();
        assert!(service.pid().is_some());

        let exit = service.shutdown().await.unwrap();
        assert!(exit.stopped);
        assert!(exit.success());
        assert_eq!(launcher.kills(), 1);
    }

    #[tokio::test]
    async fn spawn_failure_is_returned() {
        let launcher = Arc::new(FakeLauncher::failing());
        let result = supervisor(launcher, Arc::new(FakePackageManager::new()), policy(3))
            .start()
            .await;
        assert!(result.is_err());
    }
}
