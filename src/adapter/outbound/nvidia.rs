//! Hardware query via `nvidia-smi`.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::command;
use crate::domain::gpu::GpuInfo;
use crate::error::Result;
use crate::port::outbound::hardware::HardwareQuery;

const QUERY_FIELDS: &str = "name,compute_cap,driver_version,memory.total";

/// Queries the vendor tool for the first accelerator.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    program: String,
}

impl NvidiaSmi {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new("nvidia-smi")
    }
}

#[async_trait]
impl HardwareQuery for NvidiaSmi {
    async fn primary_device(&self) -> Result<Option<GpuInfo>> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(format!("--query-gpu={QUERY_FIELDS}"))
            .arg("--format=csv,noheader,nounits");

        match command::run(&self.program, &mut cmd).await {
            Ok(output) => Ok(output.stdout.lines().find_map(parse_query_line)),
            Err(e) => {
                debug!(error = %e, "Hardware query unavailable");
                Ok(None)
            }
        }
    }

    fn name(&self) -> &'static str {
        "nvidia-smi"
    }
}

/// Parse one `name, compute_cap, driver_version, memory.total` row.
#[must_use]
pub fn parse_query_line(line: &str) -> Option<GpuInfo> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [name, capability, driver_version, memory] = fields.as_slice() else {
        return None;
    };
    if name.is_empty() || capability.is_empty() {
        return None;
    }
    Some(GpuInfo {
        name: (*name).to_string(),
        capability: (*capability).to_string(),
        driver_version: (*driver_version).to_string(),
        total_memory_mib: memory.parse().ok(),
    })
}
