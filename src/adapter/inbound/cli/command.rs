//! Command-line interface definitions.
//!
//! `boot` is the container entrypoint. The remaining subcommands let an
//! operator run single boot steps or inspect the shared volume.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use super::paths;

/// Boot orchestrator for GPU serving containers
#[derive(Parser, Debug)]
#[command(name = "gpuboot")]
#[command(version, about)]
pub struct Cli {
    /// Color output mode [auto, always, never]
    #[arg(
        long,
        global = true,
        default_value = "auto",
        hide_possible_values = true
    )]
    pub color: ColorChoice,

    /// JSON output for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Decrease output verbosity
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase output verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Color output mode for terminal rendering.
#[derive(Clone, Debug, Default, clap::ValueEnum)]
pub enum ColorChoice {
    /// Detect automatically
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full boot sequence and supervise the service
    Boot(BootArgs),

    /// Provision extensions and binary assets only
    Provision(ConfigPathArg),

    /// Detect and classify the accelerator
    Classify(ClassifyArgs),

    /// Run the smoke test suite in the selected environment
    Smoke(ConfigPathArg),

    /// Show environments, markers and install locks on the volume
    Status(ConfigPathArg),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Subcommands for `gpuboot config`.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Display the effective configuration with defaults applied.
    Show(ConfigPathArg),
    /// Validate a configuration file for correctness.
    Validate(ConfigPathArg),
}

/// Shared `--config` argument.
#[derive(Args, Debug, Clone)]
pub struct ConfigPathArg {
    /// Path to the configuration file.
    #[arg(short, long, default_value_os_t = paths::default_config())]
    pub config: PathBuf,
}

/// Arguments for `gpuboot boot`.
#[derive(Args, Debug, Clone)]
pub struct BootArgs {
    #[command(flatten)]
    pub config: ConfigPathArg,

    /// Override the listen address of the service.
    #[arg(long)]
    pub host: Option<String>,

    /// Override the listen port of the service.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Skip extension and asset provisioning.
    #[arg(long)]
    pub no_provision: bool,
}

/// Arguments for `gpuboot classify`.
#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    #[command(flatten)]
    pub config: ConfigPathArg,

    /// Classify this compute capability (e.g. `8.9`) instead of querying
    /// the hardware.
    #[arg(long)]
    pub capability: Option<String>,
}
