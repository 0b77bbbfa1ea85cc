//! Handler for the `provision` command.

use std::process::ExitCode;

use crate::adapter::inbound::cli::command::ConfigPathArg;
use crate::adapter::inbound::cli::{config, output};
use crate::application::boot::{check_volume, prepare_dirs, Bootstrapper};
use crate::application::provision::ProvisionReport;
use crate::domain::asset::{AssetStatus, TaskReport};
use crate::error::Result;
use crate::infrastructure::bootstrap::build_toolchain;

/// Execute the provision command against the environment selected for this
/// machine's accelerator.
pub async fn execute(args: &ConfigPathArg) -> Result<ExitCode> {
    let config = config::load(&args.config)?;
    check_volume(&config)?;
    prepare_dirs(&config)?;

    output::header(env!("CARGO_PKG_VERSION"));
    let boot = Bootstrapper::new(&config, build_toolchain(&config)?);
    let profile = boot.classify().await?;
    let env = boot.registry().locate(profile.architecture());
    let interpreter = if env.has_interpreter() {
        Some(env.interpreter().to_path_buf())
    } else {
        output::warning(&format!(
            "no {} environment yet; extension requirements will not be installed",
            profile.architecture()
        ));
        None
    };

    output::action("Provisioning", &config.service_workdir().display().to_string());
    let report = boot.provision(interpreter).await;
    print_report(&report)?;

    let failed = report.extensions.failed() + report.assets.failed();
    Ok(if report.complete() && failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print both task reports; failed entries are listed individually.
pub fn print_report(report: &ProvisionReport) -> Result<()> {
    if output::is_json() {
        output::report("provision", serde_json::to_value(report)?);
        return Ok(());
    }

    output::section("Provisioning");
    print_task("Extensions", &report.extensions);
    print_task("Assets", &report.assets);
    output::field("Elapsed", format!("{}s", report.elapsed_secs));
    Ok(())
}

fn print_task(label: &str, task: &TaskReport) {
    if !task.complete && task.items.is_empty() {
        output::field(label, output::negative("aborted"));
        return;
    }
    output::field(
        label,
        format!(
            "{} fetched, {} present, {} failed",
            output::positive(task.completed()),
            task.skipped(),
            if task.failed() > 0 {
                output::negative(task.failed())
            } else {
                task.failed().to_string()
            },
        ),
    );
    for item in &task.items {
        if let AssetStatus::Failed { reason } = &item.status {
            output::warning(&format!("{} {}: {reason}", item.label, item.destination.display()));
        }
    }
}
