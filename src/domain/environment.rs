//! Runtime environments and pinned runtime versions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::gpu::ArchitectureClass;

/// File name of the marker written inside a verified environment.
pub const MARKER_FILE: &str = ".gpuboot.json";

/// An isolated interpreter + package installation on the shared volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    path: PathBuf,
    architecture: ArchitectureClass,
    interpreter: PathBuf,
    installed_versions: BTreeMap<String, String>,
}

impl RuntimeEnvironment {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, architecture: ArchitectureClass) -> Self {
        let path = path.into();
        let interpreter = interpreter_path(&path);
        Self {
            path,
            architecture,
            interpreter,
            installed_versions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn architecture(&self) -> ArchitectureClass {
        self.architecture
    }

    #[must_use]
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// The interpreter exists and is executable.
    #[must_use]
    pub fn has_interpreter(&self) -> bool {
        is_executable(&self.interpreter)
    }

    /// Directory holding the environment's executables.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.path.join("bin")
    }

    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.path.join(MARKER_FILE)
    }

    #[must_use]
    pub fn installed_versions(&self) -> &BTreeMap<String, String> {
        &self.installed_versions
    }

    #[must_use]
    pub fn installed_version(&self, package: &str) -> Option<&str> {
        self.installed_versions.get(package).map(String::as_str)
    }

    pub fn record_version(&mut self, package: impl Into<String>, version: impl Into<String>) {
        self.installed_versions.insert(package.into(), version.into());
    }

    pub fn forget_version(&mut self, package: &str) {
        self.installed_versions.remove(package);
    }
}

/// Interpreter location inside an environment rooted at `env_path`.
#[must_use]
pub fn interpreter_path(env_path: &Path) -> PathBuf {
    env_path.join("bin").join("python")
}

/// True when `path` is a regular file with an execute bit set.
#[must_use]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// A pinned build of the primary accelerator runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePin {
    /// Base version, e.g. `2.7.1`.
    pub version: String,
    /// Toolchain tag, e.g. `cu128`.
    pub toolchain: String,
    /// Package index serving builds for this toolchain.
    pub index_url: String,
}

impl RuntimePin {
    /// Version string as reported by the installed package (`2.7.1+cu128`).
    #[must_use]
    pub fn full_version(&self) -> String {
        format!("{}+{}", self.version, self.toolchain)
    }

    /// Exact-string comparison against an installed version.
    #[must_use]
    pub fn matches(&self, installed: Option<&str>) -> bool {
        installed.is_some_and(|installed| installed.trim() == self.full_version())
    }
}

/// Persisted record of the last verified install in an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentMarker {
    pub architecture: ArchitectureClass,
    pub runtime_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_version: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin() -> RuntimePin {
        RuntimePin {
            version: "2.7.1".into(),
            toolchain: "cu128".into(),
            index_url: "https://download.pytorch.org/whl/cu128".into(),
        }
    }

    #[test]
    fn pin_matches_exact_version_only() {
        let pin = pin();
        assert_eq!(pin.full_version(), "2.7.1+cu128");
        assert!(pin.matches(Some("2.7.1+cu128")));
        assert!(pin.matches(Some("2.7.1+cu128\n")));
        assert!(!pin.matches(Some("2.7.1")));
        assert!(!pin.matches(Some("2.7.1+cu126")));
        assert!(!pin.matches(Some("2.7.0+cu128")));
        assert!(!pin.matches(None));
    }

    #[test]
    fn environment_paths_derive_from_root() {
        let env = RuntimeEnvironment::new("/vol/envs/ada", ArchitectureClass::Ada);
        assert_eq!(env.interpreter(), Path::new("/vol/envs/ada/bin/python"));
        assert_eq!(env.bin_dir(), PathBuf::from("/vol/envs/ada/bin"));
        assert_eq!(env.marker_path(), PathBuf::from("/vol/envs/ada/.gpuboot.json"));
    }

    #[test]
    fn records_versions() {
        let mut env = RuntimeEnvironment::new("/vol/envs/ada", ArchitectureClass::Ada);
        env.record_version("torch", "2.5.1+cu124");
        assert_eq!(env.installed_version("torch"), Some("2.5.1+cu124"));
        env.forget_version("torch");
        assert!(env.installed_versions().is_empty());
    }

    #[test]
    fn marker_serializes_architecture_kebab_case() {
        let marker = EnvironmentMarker {
            architecture: ArchitectureClass::CpuOnly,
            runtime_version: "2.7.1+cpu".into(),
            secondary_version: None,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&marker).unwrap();
        assert!(json.contains("\"cpu-only\""));
        assert!(!json.contains("secondary_version"));
        let back: EnvironmentMarker = serde_json::from_str(&json).unwrap();
        assert_eq!(back, marker);
    }
}
