//! In-memory implementations of every outbound port.
//!
//! Each fake records the calls it receives so tests can assert on them, and
//! exposes builder methods to script failures.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::gpu::GpuInfo;
use crate::domain::service::LaunchSpec;
use crate::domain::smoke::{SmokeCheck, SmokeResult, SmokeStatus};
use crate::error::{Error, Result};
use crate::port::outbound::fetch::{Downloader, SourceControl};
use crate::port::outbound::hardware::HardwareQuery;
use crate::port::outbound::package::{requirement_name, InstallRequest, PackageManager};
use crate::port::outbound::probe::{Probe, ProbeOutcome, ProbeRunner};
use crate::port::outbound::process::{ProcessHandle, ProcessLauncher, SpawnedProcess};
use crate::port::outbound::readiness::ReadinessCheck;

/// Version recorded for requirements without an exact pin.
pub const UNPINNED_VERSION: &str = "1.0.0";

fn tool_error(program: &str, stderr: impl Into<String>) -> Error {
    Error::Command {
        program: program.to_string(),
        status: "exit 1".to_string(),
        stderr: stderr.into(),
    }
}

// ---------------------------------------------------------------------------
// FakePackageManager
// ---------------------------------------------------------------------------

/// Package state per interpreter, kept in memory.
#[derive(Default)]
pub struct FakePackageManager {
    installed: Mutex<BTreeMap<(PathBuf, String), String>>,
    installs: Mutex<Vec<InstallRequest>>,
    uninstalls: Mutex<Vec<Vec<String>>>,
    requirement_files: Mutex<Vec<PathBuf>>,
    created: AtomicUsize,
    fail_creation: bool,
    fail_install: HashSet<String>,
    bumps: Vec<(String, String, String)>,
}

impl FakePackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment creation fails.
    pub fn fail_creation(mut self) -> Self {
        self.fail_creation = true;
        self
    }

    /// Any install request naming `package` fails.
    pub fn fail_install_of(mut self, package: &str) -> Self {
        self.fail_install.insert(package.to_string());
        self
    }

    /// Installing `trigger` also moves `package` to `version`, the way a
    /// resolver drags a dependency along.
    pub fn bump_on_install(mut self, trigger: &str, package: &str, version: &str) -> Self {
        self.bumps
            .push((trigger.to_string(), package.to_string(), version.to_string()));
        self
    }

    pub fn set_installed(&self, interpreter: &Path, package: &str, version: &str) {
        self.installed
            .lock()
            .insert((interpreter.to_path_buf(), package.to_string()), version.to_string());
    }

    pub fn version_of(&self, interpreter: &Path, package: &str) -> Option<String> {
        self.installed
            .lock()
            .get(&(interpreter.to_path_buf(), package.to_string()))
            .cloned()
    }

    pub fn environments_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn install_calls(&self) -> Vec<InstallRequest> {
        self.installs.lock().clone()
    }

    pub fn uninstall_calls(&self) -> Vec<Vec<String>> {
        self.uninstalls.lock().clone()
    }

    pub fn requirement_files(&self) -> Vec<PathBuf> {
        self.requirement_files.lock().clone()
    }
}

#[async_trait]
impl PackageManager for FakePackageManager {
    async fn create_environment(&self, path: &Path, _python: &str) -> Result<()> {
        if self.fail_creation {
            return Err(tool_error("uv", "No interpreter found for Python 3.11"));
        }
        write_executable(&crate::domain::environment::interpreter_path(path))?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upgrade_packaging(&self, _interpreter: &Path) -> Result<()> {
        Ok(())
    }

    async fn installed_version(&self, interpreter: &Path, package: &str) -> Result<Option<String>> {
        Ok(self.version_of(interpreter, package))
    }

    async fn install(&self, interpreter: &Path, request: &InstallRequest) -> Result<()> {
        self.installs.lock().push(request.clone());

        let names: Vec<&str> = request
            .requirements
            .iter()
            .map(|r| requirement_name(r))
            .collect();
        if let Some(name) = names.iter().find(|n| self.fail_install.contains(**n)) {
            return Err(tool_error("uv", format!("No solution found when resolving {name}")));
        }

        for requirement in &request.requirements {
            let version = requirement
                .split_once("==")
                .map_or(UNPINNED_VERSION, |(_, v)| v.trim());
            self.set_installed(interpreter, requirement_name(requirement), version);
        }
        for (trigger, package, version) in &self.bumps {
            if names.contains(&trigger.as_str()) {
                self.set_installed(interpreter, package, version);
            }
        }
        Ok(())
    }

    async fn uninstall(&self, interpreter: &Path, packages: &[String]) -> Result<()> {
        self.uninstalls.lock().push(packages.to_vec());
        let mut installed = self.installed.lock();
        for package in packages {
            installed.remove(&(interpreter.to_path_buf(), package.clone()));
        }
        Ok(())
    }

    async fn install_requirements_file(&self, _interpreter: &Path, file: &Path) -> Result<()> {
        self.requirement_files.lock().push(file.to_path_buf());
        Ok(())
    }
}

fn write_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, b"#!/bin/sh\n")?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// FakeProbes
// ---------------------------------------------------------------------------

/// Scripted probe results.
#[derive(Default)]
pub struct FakeProbes {
    primary_failure: Option<String>,
    primary_failures_left: AtomicU32,
    secondary_fails: bool,
    no_device: bool,
    smoke: HashMap<SmokeCheck, SmokeStatus>,
    calls: Mutex<Vec<Probe>>,
}

impl FakeProbes {
    /// Every probe passes and an accelerator is usable.
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn fail_primary(mut self, reason: &str) -> Self {
        self.primary_failure = Some(reason.to_string());
        self
    }

    /// The primary runtime probe fails `times` times, then passes.
    pub fn fail_primary_times(self, times: u32) -> Self {
        self.primary_failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_secondary(mut self) -> Self {
        self.secondary_fails = true;
        self
    }

    /// The runtime reports no usable accelerator.
    pub fn no_device(mut self) -> Self {
        self.no_device = true;
        self
    }

    pub fn smoke_status(mut self, check: SmokeCheck, status: SmokeStatus) -> Self {
        self.smoke.insert(check, status);
        self
    }

    pub fn calls(&self) -> Vec<Probe> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ProbeRunner for FakeProbes {
    async fn run(&self, _interpreter: &Path, probe: Probe) -> Result<ProbeOutcome> {
        self.calls.lock().push(probe);
        let outcome = match probe {
            Probe::PrimaryRuntime { .. } => {
                let scripted = self
                    .primary_failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if scripted {
                    ProbeOutcome::fail("scripted primary failure")
                } else if let Some(reason) = &self.primary_failure {
                    ProbeOutcome::fail(reason.clone())
                } else {
                    ProbeOutcome::pass("ok")
                }
            }
            Probe::SecondaryModule if self.secondary_fails => {
                ProbeOutcome::fail("ImportError: undefined symbol")
            }
            Probe::SecondaryModule => ProbeOutcome::pass("ok"),
            Probe::DeviceAvailable if self.no_device => ProbeOutcome::fail("0"),
            Probe::DeviceAvailable => ProbeOutcome::pass("1"),
        };
        Ok(outcome)
    }

    async fn smoke(&self, _interpreter: &Path, check: SmokeCheck) -> Result<SmokeResult> {
        let status = self.smoke.get(&check).copied().unwrap_or(SmokeStatus::Pass);
        Ok(SmokeResult {
            name: check.name().to_string(),
            status,
            details: serde_json::json!({ "fake": true }),
        })
    }
}

// ---------------------------------------------------------------------------
// FakeHardware
// ---------------------------------------------------------------------------

pub struct FakeHardware {
    device: Option<GpuInfo>,
    fails: bool,
}

impl FakeHardware {
    /// No accelerator present.
    pub fn none() -> Self {
        Self {
            device: None,
            fails: false,
        }
    }

    /// One accelerator reporting `capability`.
    pub fn with_capability(capability: &str) -> Self {
        Self {
            device: Some(GpuInfo {
                name: format!("Fake GPU sm_{}", capability.replace('.', "")),
                capability: capability.to_string(),
                driver_version: "570.00".to_string(),
                total_memory_mib: Some(24_576),
            }),
            fails: false,
        }
    }

    /// The query tool itself is missing.
    pub fn failing() -> Self {
        Self {
            device: None,
            fails: true,
        }
    }
}

#[async_trait]
impl HardwareQuery for FakeHardware {
    async fn primary_device(&self) -> Result<Option<GpuInfo>> {
        if self.fails {
            return Err(std::io::Error::from(std::io::ErrorKind::NotFound).into());
        }
        Ok(self.device.clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// FakeSourceControl / FakeDownloader
// ---------------------------------------------------------------------------

/// "Clones" by creating the destination directory.
#[derive(Default)]
pub struct FakeSourceControl {
    failing: HashSet<String>,
    panicking: HashSet<String>,
    files: Vec<(String, String)>,
    clones: Mutex<Vec<String>>,
}

impl FakeSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_url(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn panic_on(mut self, url: &str) -> Self {
        self.panicking.insert(url.to_string());
        self
    }

    /// Every clone contains `name` with `content`.
    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.files.push((name.to_string(), content.to_string()));
        self
    }

    /// URLs attempted, in order.
    pub fn clones(&self) -> Vec<String> {
        self.clones.lock().clone()
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn clone_shallow(&self, url: &str, destination: &Path) -> Result<()> {
        self.clones.lock().push(url.to_string());
        assert!(!self.panicking.contains(url), "scripted panic cloning {url}");
        if self.failing.contains(url) {
            return Err(tool_error("git", format!("fatal: repository '{url}' not found")));
        }
        std::fs::create_dir_all(destination)?;
        for (name, content) in &self.files {
            std::fs::write(destination.join(name), content)?;
        }
        Ok(())
    }
}

/// "Downloads" by writing the URL into the destination file.
#[derive(Default)]
pub struct FakeDownloader {
    failing: HashSet<String>,
    downloads: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_url(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        self.downloads.lock().push(url.to_string());
        if self.failing.contains(url) {
            return Err(tool_error("curl", "404 Not Found"));
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, url)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// FakeLauncher
// ---------------------------------------------------------------------------

/// Behaviour of one scripted process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    lines: Vec<String>,
    /// `None` keeps the process running until killed.
    exit: Option<i32>,
}

impl Script {
    pub fn exits(code: i32) -> Self {
        Self {
            lines: Vec::new(),
            exit: Some(code),
        }
    }

    pub fn runs_forever() -> Self {
        Self {
            lines: Vec::new(),
            exit: None,
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }
}

/// Hands out scripted processes in order; the last script repeats.
pub struct FakeLauncher {
    scripts: Mutex<VecDeque<Script>>,
    specs: Mutex<Vec<LaunchSpec>>,
    kills: Arc<AtomicUsize>,
    next_pid: AtomicU32,
    fails: bool,
}

impl FakeLauncher {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            specs: Mutex::new(Vec::new()),
            kills: Arc::new(AtomicUsize::new(0)),
            next_pid: AtomicU32::new(4242),
            fails: false,
        }
    }

    /// A service that starts and keeps running.
    pub fn long_running() -> Self {
        Self::new([Script::runs_forever().line("To see the GUI go to: http://0.0.0.0:8188")])
    }

    /// Every spawn fails.
    pub fn failing() -> Self {
        Self {
            fails: true,
            ..Self::new([])
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.specs.lock().len()
    }

    pub fn specs(&self) -> Vec<LaunchSpec> {
        self.specs.lock().clone()
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock();
        if scripts.len() > 1 {
            scripts.pop_front().unwrap_or_else(Script::runs_forever)
        } else {
            scripts.front().cloned().unwrap_or_else(Script::runs_forever)
        }
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedProcess> {
        if self.fails {
            return Err(std::io::Error::from(std::io::ErrorKind::NotFound).into());
        }
        self.specs.lock().push(spec.clone());
        let script = self.next_script();

        let (tx, rx) = mpsc::channel(script.lines.len().max(1));
        for line in script.lines {
            let _ = tx.try_send(line);
        }

        Ok(SpawnedProcess {
            output: rx,
            handle: Box::new(FakeHandle {
                pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
                exit: script.exit,
                killed: false,
                kills: Arc::clone(&self.kills),
            }),
        })
    }
}

struct FakeHandle {
    pid: u32,
    exit: Option<i32>,
    killed: bool,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        if self.killed {
            return Ok(None);
        }
        match self.exit {
            Some(code) => Ok(Some(code)),
            None => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> Result<()> {
        self.killed = true;
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeReadiness
// ---------------------------------------------------------------------------

/// Ready from the n-th attempt onwards.
pub struct FakeReadiness {
    ready_from: Option<u32>,
    attempts: AtomicU32,
}

impl FakeReadiness {
    pub fn ready_after(attempts: u32) -> Self {
        Self {
            ready_from: Some(attempts),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn always() -> Self {
        Self::ready_after(1)
    }

    pub fn never() -> Self {
        Self {
            ready_from: None,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessCheck for FakeReadiness {
    async fn check(&self, _url: &str) -> bool {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.ready_from.is_some_and(|from| attempt >= from)
    }
}
