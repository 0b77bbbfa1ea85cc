use std::path::PathBuf;

use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Fatal boot preconditions. Any of these ends the boot with exit code 1.
#[derive(Error, Debug)]
pub enum BootError {
    #[error("shared volume unavailable at {path}: {reason}")]
    VolumeUnavailable { path: PathBuf, reason: String },

    #[error("an accelerator is required but none was detected")]
    GpuRequired,

    #[error("failed to create runtime environment at {path}: {reason}")]
    EnvironmentCreation { path: PathBuf, reason: String },

    #[error("failed to install {package}=={version}: {reason}")]
    RuntimeInstall {
        package: String,
        version: String,
        reason: String,
    },

    #[error("primary runtime {version} failed verification: {reason}")]
    RuntimeVerification { version: String, reason: String },

    #[error("install lock {path}: {reason}")]
    Lock { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Boot(#[from] BootError),

    #[error("{program} failed ({status}): {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that must abort the boot.
    #[must_use]
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(self, Error::Boot(_) | Error::Config(_))
    }
}
