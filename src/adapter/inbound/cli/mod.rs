//! CLI module graph.

pub mod boot;
pub mod classify;
pub mod command;
pub mod config;
pub mod output;
pub mod paths;
pub mod provision;
pub mod smoke;
pub mod status;

use std::process::ExitCode;

use command::{Commands, ConfigCommand};

use crate::error::Result;

/// Route a parsed subcommand to its handler.
pub async fn dispatch(command: &Commands) -> Result<ExitCode> {
    match command {
        Commands::Boot(args) => boot::execute(args).await,
        Commands::Provision(args) => provision::execute(args).await,
        Commands::Classify(args) => classify::execute(args).await,
        Commands::Smoke(args) => smoke::execute(args).await,
        Commands::Status(args) => status::execute(args),
        Commands::Config(ConfigCommand::Show(args)) => {
            config::execute_show(&args.config).map(|()| ExitCode::SUCCESS)
        }
        Commands::Config(ConfigCommand::Validate(args)) => {
            config::execute_validate(&args.config).map(|()| ExitCode::SUCCESS)
        }
    }
}
