//! Handler for the `smoke` command.

use std::process::ExitCode;

use crate::adapter::inbound::cli::command::ConfigPathArg;
use crate::adapter::inbound::cli::{config, output};
use crate::application::boot::Bootstrapper;
use crate::application::smoke::SmokeSuite;
use crate::domain::smoke::{SmokeReport, SmokeStatus};
use crate::error::{BootError, Result};
use crate::infrastructure::bootstrap::build_toolchain;

/// Execute the smoke suite; exits non-zero when any check failed.
pub async fn execute(args: &ConfigPathArg) -> Result<ExitCode> {
    let config = config::load(&args.config)?;
    let toolchain = build_toolchain(&config)?;
    let probes = toolchain.probes.clone();
    let boot = Bootstrapper::new(&config, toolchain);

    let profile = boot.classify().await?;
    let env = boot.registry().locate(profile.architecture());
    if !env.has_interpreter() {
        return Err(BootError::EnvironmentCreation {
            path: env.path().to_path_buf(),
            reason: "environment has not been created; run `gpuboot boot` first".to_string(),
        }
        .into());
    }

    output::action("Testing", &env.path().display().to_string());
    let (report, path) = SmokeSuite::new(probes)
        .run(&env, &profile, &config.smoke_dir())
        .await?;
    print_report(&report)?;
    output::field("Report", path.display());

    Ok(if report.failed() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &SmokeReport) -> Result<()> {
    if output::is_json() {
        output::report("smoke", serde_json::to_value(report)?);
        return Ok(());
    }

    output::section("Smoke Tests");
    for test in &report.tests {
        let status = match test.status {
            SmokeStatus::Pass => output::positive("PASS"),
            SmokeStatus::Fail => output::negative("FAIL"),
            SmokeStatus::Skip => output::muted("SKIP"),
        };
        output::field(&test.name, status);
        if test.status == SmokeStatus::Fail || output::verbosity() > 0 {
            output::note(&test.details.to_string());
        }
    }
    output::field(
        "Summary",
        format!(
            "{} passed, {} failed, {} skipped",
            report.passed(),
            report.failed(),
            report.skipped()
        ),
    );
    Ok(())
}
