//! The served application as seen by the launcher.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Flag passed to the service when no usable accelerator is present.
pub const CPU_FALLBACK_FLAG: &str = "--cpu";

/// Flag passed to the service when the secondary module is unusable.
pub const DISABLE_SECONDARY_FLAG: &str = "--disable-xformers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Starting,
    Ready,
    /// Readiness never confirmed; the process is left running for debugging.
    Degraded,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        })
    }
}

/// Everything needed to start a child process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Full argv, program first.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// The served application for this container lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceProcess {
    pub pid: Option<u32>,
    pub listen_host: String,
    pub listen_port: u16,
    pub argv: Vec<String>,
    pub ready_state: ReadyState,
}

/// Extract the module name from a `No module named 'x'` line.
///
/// Dotted names are reduced to their top-level package.
#[must_use]
pub fn missing_module(line: &str) -> Option<&str> {
    const NEEDLE: &str = "No module named ";
    let start = line.find(NEEDLE)? + NEEDLE.len();
    let rest = line[start..].trim_start();
    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let rest = &rest[1..];
    let end = rest.find(quote)?;
    let module = &rest[..end];
    let module = module.split('.').next().unwrap_or(module);
    if module.is_empty() {
        None
    } else {
        Some(module)
    }
}
