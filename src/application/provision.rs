//! Extension and binary asset provisioning.
//!
//! Two independent tasks (extensions, binary assets) run concurrently on
//! the runtime and are joined before the supervisor returns. Each task
//! works through its manifest with bounded concurrency. Per-entry failures
//! are logged and recorded, never propagated; a panic inside one task is
//! contained to that task's report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::domain::asset::{AssetKind, AssetManifest, AssetStatus, AssetTask, ExtensionManifest, TaskReport};
use crate::infrastructure::config::logging::{ASSETS_TARGET, EXTENSIONS_TARGET};
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::fetch::{Downloader, SourceControl};
use crate::port::outbound::package::PackageManager;

const REQUIREMENTS_FILE: &str = "requirements.txt";

#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub extensions_manifest: PathBuf,
    pub assets_manifest: PathBuf,
    pub extensions_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub concurrency: usize,
    pub progress_interval: Duration,
    pub install_requirements: bool,
}

impl ProvisionPlan {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            extensions_manifest: config.provisioning.extensions_manifest.clone(),
            assets_manifest: config.provisioning.assets_manifest.clone(),
            extensions_dir: config.extensions_dir(),
            assets_dir: config.assets_dir(),
            concurrency: config.provisioning.concurrency.max(1),
            progress_interval: config.provisioning.progress_interval(),
            install_requirements: config.provisioning.install_requirements,
        }
    }
}

/// Joined result of both provisioning tasks.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub extensions: TaskReport,
    pub assets: TaskReport,
    pub elapsed_secs: u64,
}

impl ProvisionReport {
    #[must_use]
    pub fn complete(&self) -> bool {
        self.extensions.complete && self.assets.complete
    }
}

pub struct AssetSupervisor {
    source_control: Arc<dyn SourceControl>,
    downloader: Arc<dyn Downloader>,
    packages: Arc<dyn PackageManager>,
    plan: ProvisionPlan,
}

impl AssetSupervisor {
    #[must_use]
    pub fn new(
        source_control: Arc<dyn SourceControl>,
        downloader: Arc<dyn Downloader>,
        packages: Arc<dyn PackageManager>,
        plan: ProvisionPlan,
    ) -> Self {
        Self {
            source_control,
            downloader,
            packages,
            plan,
        }
    }

    /// Run both tasks to completion. `interpreter` receives extension
    /// requirements; without one they are skipped.
    pub async fn run(&self, interpreter: Option<PathBuf>) -> ProvisionReport {
        let started = Instant::now();
        info!(
            extensions = %self.plan.extensions_manifest.display(),
            assets = %self.plan.assets_manifest.display(),
            concurrency = self.plan.concurrency,
            "Provisioning started"
        );

        let extensions = ExtensionTask {
            source_control: Arc::clone(&self.source_control),
            packages: Arc::clone(&self.packages),
            interpreter: interpreter.filter(|_| self.plan.install_requirements),
            manifest: self.plan.extensions_manifest.clone(),
            dir: self.plan.extensions_dir.clone(),
            concurrency: self.plan.concurrency,
        };
        let assets = AssetTaskRunner {
            downloader: Arc::clone(&self.downloader),
            manifest: self.plan.assets_manifest.clone(),
            dir: self.plan.assets_dir.clone(),
            concurrency: self.plan.concurrency,
        };

        let mut extension_handle = tokio::spawn(extensions.run());
        let mut asset_handle = tokio::spawn(assets.run());

        let mut ticker =
            tokio::time::interval(self.plan.progress_interval.max(Duration::from_millis(1)));
        ticker.tick().await;

        let mut extension_report = None;
        let mut asset_report = None;
        while extension_report.is_none() || asset_report.is_none() {
            tokio::select! {
                joined = &mut extension_handle, if extension_report.is_none() => {
                    extension_report = Some(settle(AssetKind::Extension, joined));
                }
                joined = &mut asset_handle, if asset_report.is_none() => {
                    asset_report = Some(settle(AssetKind::Binary, joined));
                }
                _ = ticker.tick() => {
                    info!(
                        elapsed_secs = started.elapsed().as_secs(),
                        extensions_done = extension_report.is_some(),
                        assets_done = asset_report.is_some(),
                        "Provisioning in progress"
                    );
                }
            }
        }

        let report = ProvisionReport {
            extensions: extension_report.unwrap_or_else(|| TaskReport::aborted(AssetKind::Extension)),
            assets: asset_report.unwrap_or_else(|| TaskReport::aborted(AssetKind::Binary)),
            elapsed_secs: started.elapsed().as_secs(),
        };
        info!(
            elapsed_secs = report.elapsed_secs,
            extensions_completed = report.extensions.completed(),
            extensions_skipped = report.extensions.skipped(),
            extensions_failed = report.extensions.failed(),
            assets_completed = report.assets.completed(),
            assets_skipped = report.assets.skipped(),
            assets_failed = report.assets.failed(),
            "Provisioning finished"
        );
        report
    }
}

fn settle(kind: AssetKind, joined: Result<TaskReport, JoinError>) -> TaskReport {
    match joined {
        Ok(report) => report,
        Err(e) => {
            error!(task = %kind, error = %e, "Provisioning task aborted");
            TaskReport::aborted(kind)
        }
    }
}

/// Read a manifest file. A missing file is an empty manifest; an unreadable
/// or malformed one is `None`.
fn read_manifest(path: &Path, kind: AssetKind) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(task = %kind, path = %path.display(), "Manifest not found, nothing to provision");
            Some("{}".to_string())
        }
        Err(e) => {
            error!(task = %kind, path = %path.display(), error = %e, "Manifest unreadable");
            None
        }
    }
}

struct ExtensionTask {
    source_control: Arc<dyn SourceControl>,
    packages: Arc<dyn PackageManager>,
    interpreter: Option<PathBuf>,
    manifest: PathBuf,
    dir: PathBuf,
    concurrency: usize,
}

impl ExtensionTask {
    async fn run(self) -> TaskReport {
        let Some(content) = read_manifest(&self.manifest, AssetKind::Extension) else {
            return TaskReport::aborted(AssetKind::Extension);
        };
        let manifest = match ExtensionManifest::parse(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(target: EXTENSIONS_TARGET, error = %e, "Invalid extension manifest");
                return TaskReport::aborted(AssetKind::Extension);
            }
        };
        for key in manifest.rejected() {
            warn!(target: EXTENSIONS_TARGET, %key, "Skipping manifest entry with an unsafe name");
        }
        info!(target: EXTENSIONS_TARGET, count = manifest.len(), dir = %self.dir.display(), "Provisioning extensions");

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            error!(target: EXTENSIONS_TARGET, error = %e, "Cannot create extensions directory");
        }

        let this = &self;
        let items: Vec<AssetTask> = stream::iter(manifest.tasks(&self.dir))
            .map(|task| this.provision(task))
            .buffered(self.concurrency)
            .collect()
            .await;
        TaskReport::new(AssetKind::Extension, items)
    }

    async fn provision(&self, mut task: AssetTask) -> AssetTask {
        if task.destination.exists() {
            info!(target: EXTENSIONS_TARGET, name = %task.label, "Already present, skipping");
            task.status = AssetStatus::Skipped;
            return task;
        }
        if task.sources.is_empty() {
            warn!(target: EXTENSIONS_TARGET, name = %task.label, "No candidate URLs");
            task.status = AssetStatus::Failed {
                reason: "no candidate URLs".to_string(),
            };
            return task;
        }

        let mut last_error = String::new();
        for url in &task.sources {
            info!(target: EXTENSIONS_TARGET, name = %task.label, %url, "Cloning");
            match self.source_control.clone_shallow(url, &task.destination).await {
                Ok(()) => {
                    info!(target: EXTENSIONS_TARGET, name = %task.label, %url, "Cloned");
                    self.install_requirements(&task).await;
                    task.status = AssetStatus::Completed { source: url.clone() };
                    return task;
                }
                Err(e) => {
                    warn!(target: EXTENSIONS_TARGET, name = %task.label, %url, error = %e, "Clone failed");
                    last_error = e.to_string();
                }
            }
        }

        error!(target: EXTENSIONS_TARGET, name = %task.label, "All candidates failed");
        task.status = AssetStatus::Failed {
            reason: format!("all {} candidates failed: {last_error}", task.sources.len()),
        };
        task
    }

    async fn install_requirements(&self, task: &AssetTask) {
        let Some(interpreter) = &self.interpreter else {
            return;
        };
        let requirements = task.destination.join(REQUIREMENTS_FILE);
        if !requirements.is_file() {
            return;
        }
        info!(target: EXTENSIONS_TARGET, name = %task.label, "Installing extension requirements");
        if let Err(e) = self
            .packages
            .install_requirements_file(interpreter, &requirements)
            .await
        {
            warn!(target: EXTENSIONS_TARGET, name = %task.label, error = %e, "Requirements install failed");
        }
    }
}

struct AssetTaskRunner {
    downloader: Arc<dyn Downloader>,
    manifest: PathBuf,
    dir: PathBuf,
    concurrency: usize,
}

impl AssetTaskRunner {
    async fn run(self) -> TaskReport {
        let Some(content) = read_manifest(&self.manifest, AssetKind::Binary) else {
            return TaskReport::aborted(AssetKind::Binary);
        };
        let manifest = match AssetManifest::parse(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(target: ASSETS_TARGET, error = %e, "Invalid asset manifest");
                return TaskReport::aborted(AssetKind::Binary);
            }
        };
        for key in manifest.rejected() {
            warn!(target: ASSETS_TARGET, %key, "Skipping manifest entry with an unsafe name");
        }
        info!(
            target: ASSETS_TARGET,
            count = manifest.len(),
            downloader = self.downloader.name(),
            dir = %self.dir.display(),
            "Provisioning binary assets"
        );

        let this = &self;
        let items: Vec<AssetTask> = stream::iter(manifest.tasks(&self.dir))
            .map(|task| this.provision(task))
            .buffered(self.concurrency)
            .collect()
            .await;
        TaskReport::new(AssetKind::Binary, items)
    }

    async fn provision(&self, mut task: AssetTask) -> AssetTask {
        if let AssetStatus::Failed { reason } = &task.status {
            warn!(target: ASSETS_TARGET, category = %task.label, %reason, "Skipping entry");
            return task;
        }
        if task.destination.exists() {
            info!(target: ASSETS_TARGET, path = %task.destination.display(), "Already present, skipping");
            task.status = AssetStatus::Skipped;
            return task;
        }

        let Some(url) = task.sources.first().cloned() else {
            task.status = AssetStatus::Failed {
                reason: "no URL".to_string(),
            };
            return task;
        };
        info!(target: ASSETS_TARGET, %url, path = %task.destination.display(), "Downloading");
        let started = Instant::now();
        match self.downloader.download(&url, &task.destination).await {
            Ok(()) => {
                info!(
                    target: ASSETS_TARGET,
                    path = %task.destination.display(),
                    elapsed_secs = started.elapsed().as_secs(),
                    "Downloaded"
                );
                task.status = AssetStatus::Completed { source: url };
            }
            Err(e) => {
                error!(target: ASSETS_TARGET, %url, error = %e, "Download failed");
                task.status = AssetStatus::Failed {
                    reason: e.to_string(),
                };
            }
        }
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::fakes::{FakeDownloader, FakePackageManager, FakeSourceControl};

    fn plan(root: &Path) -> ProvisionPlan {
        ProvisionPlan {
            extensions_manifest: root.join("nodes.json"),
            assets_manifest: root.join("models.json"),
            extensions_dir: root.join("custom_nodes"),
            assets_dir: root.join("models"),
            concurrency: 2,
            progress_interval: Duration::from_millis(20),
            install_requirements: true,
        }
    }

    fn supervisor(
        root: &Path,
        git: Arc<FakeSourceControl>,
        downloader: Arc<FakeDownloader>,
        packages: Arc<FakePackageManager>,
    ) -> AssetSupervisor {
        AssetSupervisor::new(git, downloader, packages, plan(root))
    }

    #[tokio::test]
    async fn missing_manifests_complete_with_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let report = supervisor(
            dir.path(),
            Arc::new(FakeSourceControl::new()),
            Arc::new(FakeDownloader::new()),
            Arc::new(FakePackageManager::new()),
        )
        .run(None)
        .await;

        assert!(report.complete());
        assert!(report.extensions.items.is_empty());
        assert!(report.assets.items.is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_next_candidate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nodes.json"),
            r#"{"manager": ["https://broken.example/manager", "https://github.com/org/manager"]}"#,
        )
        .unwrap();
        let git = Arc::new(FakeSourceControl::new().fail_url("https://broken.example/manager"));

        let report = supervisor(
            dir.path(),
            git.clone(),
            Arc::new(FakeDownloader::new()),
            Arc::new(FakePackageManager::new()),
        )
        .run(None)
        .await;

        assert_eq!(
            report.extensions.items[0].status,
            AssetStatus::Completed {
                source: "https://github.com/org/manager".into()
            }
        );
        assert_eq!(git.clones().len(), 2);
    }

    #[tokio::test]
    async fn installs_requirements_after_fresh_clone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nodes.json"),
            r#"{"impact": "https://github.com/org/impact"}"#,
        )
        .unwrap();
        let git = Arc::new(FakeSourceControl::new().with_file("requirements.txt", "ultralytics\n"));
        let packages = Arc::new(FakePackageManager::new());

        supervisor(dir.path(), git, Arc::new(FakeDownloader::new()), packages.clone())
            .run(Some(PathBuf::from("/vol/envs/ada/bin/python")))
            .await;

        assert_eq!(
            packages.requirement_files(),
            vec![dir.path().join("custom_nodes/impact/requirements.txt")]
        );
    }

    #[tokio::test]
    async fn download_failure_does_not_stop_batch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("models.json"),
            r#"{"vae": ["https://cdn.example/bad.safetensors", "https://cdn.example/ae.safetensors"]}"#,
        )
        .unwrap();
        let downloader = Arc::new(FakeDownloader::new().fail_url("https://cdn.example/bad.safetensors"));

        let report = supervisor(
            dir.path(),
            Arc::new(FakeSourceControl::new()),
            downloader,
            Arc::new(FakePackageManager::new()),
        )
        .run(None)
        .await;

        assert!(report.assets.complete);
        assert_eq!(report.assets.failed(), 1);
        assert_eq!(report.assets.completed(), 1);
        assert!(dir.path().join("models/vae/ae.safetensors").exists());
        assert!(!dir.path().join("models/vae/bad.safetensors").exists());
    }

    #[tokio::test]
    async fn invalid_manifest_aborts_only_its_task() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nodes.json"), "not json").unwrap();
        std::fs::write(
            dir.path().join("models.json"),
            r#"{"loras": ["https://cdn.example/detail.safetensors"]}"#,
        )
        .unwrap();

        let report = supervisor(
            dir.path(),
            Arc::new(FakeSourceControl::new()),
            Arc::new(FakeDownloader::new()),
            Arc::new(FakePackageManager::new()),
        )
        .run(None)
        .await;

        assert!(!report.extensions.complete);
        assert!(report.assets.complete);
        assert_eq!(report.assets.completed(), 1);
    }

    #[tokio::test]
    async fn unsafe_key_is_dropped_without_losing_its_neighbours() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nodes.json"), "{}").unwrap();
        std::fs::write(
            dir.path().join("models.json"),
            r#"{"../../etc": ["https://cdn.example/passwd"], "loras": ["https://cdn.example/detail.safetensors"]}"#,
        )
        .unwrap();
        let downloader = Arc::new(FakeDownloader::new());

        let report = supervisor(
            dir.path(),
            Arc::new(FakeSourceControl::new()),
            downloader.clone(),
            Arc::new(FakePackageManager::new()),
        )
        .run(None)
        .await;

        assert!(report.assets.complete);
        assert_eq!(report.assets.items.len(), 1);
        assert_eq!(report.assets.completed(), 1);
        assert_eq!(downloader.downloads().len(), 1);
    }

    #[tokio::test]
    async fn panic_in_one_task_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nodes.json"), r#"{"boom": "https://github.com/org/boom"}"#).unwrap();
        std::fs::write(
            dir.path().join("models.json"),
            r#"{"vae": ["https://cdn.example/ae.safetensors"]}"#,
        )
        .unwrap();
        let git = Arc::new(FakeSourceControl::new().panic_on("https://github.com/org/boom"));

        let report = supervisor(
            dir.path(),
            git,
            Arc::new(FakeDownloader::new()),
            Arc::new(FakePackageManager::new()),
        )
        .run(None)
        .await;

        assert!(!report.extensions.complete);
        assert!(report.assets.complete);
        assert_eq!(report.assets.completed(), 1);
    }
}
