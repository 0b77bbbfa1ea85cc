//! Logging configuration and initialization.
//!
//! Besides the main stdout log, three streams are written to the shared
//! volume, each fed by its own tracing target.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use tracing::{warn, Level};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Target used by the extension provisioning task.
pub const EXTENSIONS_TARGET: &str = "extensions";
/// Target used by the binary asset provisioning task.
pub const ASSETS_TARGET: &str = "assets";
/// Target used for the served application's output and lifecycle.
pub const SERVICE_TARGET: &str = "service";

/// Stream file names, keyed by target.
pub const LOG_STREAMS: [(&str, &str); 3] = [
    (EXTENSIONS_TARGET, "extensions.log"),
    (ASSETS_TARGET, "assets.log"),
    (SERVICE_TARGET, "service.log"),
];

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_format")]
    pub format: String,
    /// Directory for the stream files; defaults to `<volume>/logs`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

impl LoggingConfig {
    /// Initialize the tracing subscriber.
    ///
    /// Stream files that cannot be opened are skipped with a warning once the
    /// stdout layer is live. Calling this twice is a no-op.
    pub fn init(&self, log_dir: Option<&Path>) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let stdout: BoxedLayer = match self.format.as_str() {
            "json" => fmt::layer().json().with_filter(filter).boxed(),
            _ => fmt::layer().with_filter(filter).boxed(),
        };

        let mut layers = vec![stdout];
        let mut failures = Vec::new();
        if let Some(dir) = log_dir {
            for (target, file_name) in LOG_STREAMS {
                let path = dir.join(file_name);
                match open_stream(&path) {
                    Ok(file) => layers.push(stream_layer(target, file)),
                    Err(e) => failures.push((path, e)),
                }
            }
        }

        if tracing_subscriber::registry().with(layers).try_init().is_err() {
            return;
        }

        for (path, error) in failures {
            warn!(path = %path.display(), error = %error, "Log stream unavailable");
        }
    }
}

fn open_stream(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn stream_layer(target: &'static str, file: File) -> BoxedLayer {
    fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .with_filter(Targets::new().with_target(target, Level::DEBUG))
        .boxed()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            dir: None,
        }
    }
}
