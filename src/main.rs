use std::process::ExitCode;

use clap::Parser;
use gpuboot::adapter::inbound::cli::command::Cli;
use gpuboot::adapter::inbound::cli::output::{self, OutputConfig};
use gpuboot::adapter::inbound::cli::dispatch;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    output::configure(OutputConfig::new(cli.json, cli.quiet, cli.verbose), &cli.color);

    match dispatch(&cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal_precondition(), "Command failed");
            output::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
