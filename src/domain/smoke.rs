//! Accelerator smoke test results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::gpu::{ArchitectureClass, GpuInfo};

/// Individual checks run by the smoke suite, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmokeCheck {
    RuntimeBasic,
    SecondaryModule,
    MultiDevice,
    MemoryEfficiency,
    ArchitectureSpecific,
}

impl SmokeCheck {
    pub const ALL: [SmokeCheck; 5] = [
        Self::RuntimeBasic,
        Self::SecondaryModule,
        Self::MultiDevice,
        Self::MemoryEfficiency,
        Self::ArchitectureSpecific,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RuntimeBasic => "runtime_basic",
            Self::SecondaryModule => "secondary_module",
            Self::MultiDevice => "multi_device",
            Self::MemoryEfficiency => "memory_efficiency",
            Self::ArchitectureSpecific => "architecture_specific",
        }
    }
}

impl fmt::Display for SmokeCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SmokeStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmokeResult {
    pub name: String,
    pub status: SmokeStatus,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl SmokeResult {
    #[must_use]
    pub fn failed(check: SmokeCheck, reason: impl Into<String>) -> Self {
        Self {
            name: check.name().to_string(),
            status: SmokeStatus::Fail,
            details: serde_json::json!({ "error": reason.into() }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeReport {
    pub timestamp: DateTime<Utc>,
    pub gpu_info: Option<GpuInfo>,
    pub architecture: ArchitectureClass,
    pub tests: Vec<SmokeResult>,
}

impl SmokeReport {
    fn count(&self, status: SmokeStatus) -> usize {
        self.tests.iter().filter(|t| t.status == status).count()
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(SmokeStatus::Pass)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(SmokeStatus::Fail)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(SmokeStatus::Skip)
    }

    /// `smoke_test_<arch>_<unix seconds>.json`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "smoke_test_{}_{}.json",
            self.architecture,
            self.timestamp.timestamp()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_parses_script_output() {
        let result: SmokeResult = serde_json::from_str(
            r#"{"name":"multi_device","status":"SKIP","details":{"reason":"Single GPU detected"}}"#,
        )
        .unwrap();
        assert_eq!(result.status, SmokeStatus::Skip);
        assert_eq!(result.details["reason"], "Single GPU detected");
    }

    #[test]
    fn report_summary_and_file_name() {
        let report = SmokeReport {
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            gpu_info: None,
            architecture: ArchitectureClass::Ada,
            tests: vec![
                SmokeResult::failed(SmokeCheck::RuntimeBasic, "boom"),
                SmokeResult {
                    name: "secondary_module".into(),
                    status: SmokeStatus::Pass,
                    details: serde_json::Value::Null,
                },
            ],
        };
        assert_eq!(report.failed(), 1);
        assert_eq!(report.passed(), 1);
        assert_eq!(report.skipped(), 0);
        assert_eq!(report.file_name(), "smoke_test_ada_1700000000.json");
    }
}
