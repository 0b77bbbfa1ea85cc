#![allow(dead_code)]

use std::path::{Path, PathBuf};

use chrono::Utc;
use gpuboot::application::lock::{lock_path, LockRecord};
use gpuboot::domain::gpu::ArchitectureClass;
use gpuboot::infrastructure::Config;
use gpuboot::port::outbound::package::InstallRequest;
use gpuboot::testkit::config::config_for;
use tempfile::TempDir;

/// A temp directory standing in for the shared volume.
pub struct Volume {
    pub dir: TempDir,
    pub config: Config,
}

impl Volume {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create volume");
        let config = config_for(dir.path());
        Self { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn env_path(&self, class: ArchitectureClass) -> PathBuf {
        self.config.envs_root().join(class.as_str())
    }

    pub fn interpreter(&self, class: ArchitectureClass) -> PathBuf {
        self.env_path(class).join("bin").join("python")
    }

    pub fn write_extensions(&self, json: &str) {
        std::fs::write(&self.config.provisioning.extensions_manifest, json).expect("write manifest");
    }

    pub fn write_assets(&self, json: &str) {
        std::fs::write(&self.config.provisioning.assets_manifest, json).expect("write manifest");
    }

    /// Create `class`'s environment the way a sibling container left it:
    /// an executable interpreter and nothing installed.
    pub fn seed_environment(&self, class: ArchitectureClass) {
        use std::os::unix::fs::PermissionsExt;

        let interpreter = self.interpreter(class);
        std::fs::create_dir_all(interpreter.parent().expect("bin dir")).expect("create env");
        std::fs::write(&interpreter, b"#!/bin/sh\n").expect("write interpreter");
        std::fs::set_permissions(&interpreter, std::fs::Permissions::from_mode(0o755))
            .expect("chmod interpreter");
    }

    /// Place a fresh lock for `class` held by this (live) process.
    pub fn hold_lock(&self, class: ArchitectureClass) -> PathBuf {
        let env = self.env_path(class);
        let path = lock_path(&env);
        std::fs::create_dir_all(path.parent().expect("lock parent")).expect("create envs root");
        let record = LockRecord {
            pid: std::process::id(),
            hostname: hostname(),
            acquired_at: Utc::now(),
            environment: env,
        };
        std::fs::write(&path, serde_json::to_vec(&record).expect("encode lock")).expect("write lock");
        path
    }
}

/// Host name as the lock module reads it.
pub fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Install calls that targeted `package`.
pub fn installs_of<'a>(calls: &'a [InstallRequest], package: &str) -> Vec<&'a InstallRequest> {
    calls
        .iter()
        .filter(|request| {
            request
                .requirements
                .iter()
                .any(|r| gpuboot::port::outbound::package::requirement_name(r) == package)
        })
        .collect()
}
