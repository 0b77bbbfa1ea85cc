//! Handler for the `boot` command.

use std::process::ExitCode;

use tracing::{info, warn};

use crate::adapter::inbound::cli::command::BootArgs;
use crate::adapter::inbound::cli::{config, output, provision};
use crate::application::boot::{BootReport, Booted, Bootstrapper};
use crate::application::install::InstallOutcome;
use crate::application::secondary::SecondaryOutcome;
use crate::application::supervisor::ServiceExit;
use crate::domain::service::ReadyState;
use crate::error::Result;
use crate::infrastructure::bootstrap::build_toolchain;
use crate::infrastructure::config::settings::Config;

/// Execute the boot command: boot, then supervise until the service exits
/// or the container is asked to stop.
pub async fn execute(args: &BootArgs) -> Result<ExitCode> {
    let mut config = config::load(&args.config.config)?;
    apply_overrides(&mut config, args);

    output::header(env!("CARGO_PKG_VERSION"));
    output::action("Booting", &config.volume.root.display().to_string());

    let toolchain = build_toolchain(&config)?;
    let Booted {
        report,
        mut service,
        console,
    } = Bootstrapper::new(&config, toolchain).boot().await?;
    print_report(&report)?;

    let finished = tokio::select! {
        result = service.wait() => Some(result),
        () = shutdown_signal() => None,
    };
    let exit = match finished {
        Some(result) => result?,
        None => {
            info!("Shutdown signal received");
            service.shutdown().await?
        }
    };

    if let Some(console) = console {
        if let Err(e) = console.shutdown().await {
            warn!(error = %e, "Development console did not stop cleanly");
        }
    }

    print_exit(&exit);
    Ok(if exit.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn apply_overrides(config: &mut Config, args: &BootArgs) {
    if let Some(host) = &args.host {
        config.service.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.service.port = port;
    }
    if args.no_provision {
        config.provisioning.enabled = false;
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

fn print_report(report: &BootReport) -> Result<()> {
    if output::is_json() {
        output::report("boot", serde_json::to_value(report)?);
        return Ok(());
    }

    output::section("Hardware");
    output::field("Architecture", output::highlight(report.architecture));
    output::field("Capability", report.profile.raw_capability().unwrap_or("none"));
    output::field("Toolchain", report.profile.toolchain());
    if let Some(device) = report.profile.device() {
        output::field("Device", &device.name);
        output::field("Driver", &device.driver_version);
    }

    output::section("Environment");
    output::field("Path", report.environment.display());
    for (package, version) in &report.installed_versions {
        output::field(package, version);
    }
    output::field(
        "Runtime",
        match report.install {
            InstallOutcome::AlreadyInstalled => "already installed",
            InstallOutcome::InstalledBySibling => "installed by another container",
            InstallOutcome::Installed => "installed",
        },
    );
    match &report.secondary {
        SecondaryOutcome::Disabled => output::field("Secondary", output::muted("disabled")),
        SecondaryOutcome::Ready { version } => output::field("Secondary", output::positive(version)),
        SecondaryOutcome::Unavailable { reason } => {
            output::field("Secondary", output::negative("unavailable"));
            output::warning(reason);
        }
    }

    if let Some(provision) = &report.provision {
        provision::print_report(provision)?;
    }

    output::section("Service");
    output::field(
        "Listen",
        format!("{}:{}", report.service.listen_host, report.service.listen_port),
    );
    if let Some(pid) = report.service.pid {
        output::field("Pid", pid);
    }
    if output::verbosity() > 0 {
        output::field("Command", report.service.argv.join(" "));
    }
    match report.service.ready_state {
        ReadyState::Ready => output::success("Service is ready"),
        state => {
            output::warning(&format!("Service is {state}; leaving it running for inspection"));
            output::hint("check <volume>/logs/service.log");
        }
    }
    Ok(())
}

fn print_exit(exit: &ServiceExit) {
    if output::is_json() {
        output::report(
            "exit",
            serde_json::json!({
                "code": exit.code,
                "restarts": exit.restarts,
                "stopped": exit.stopped,
            }),
        );
        return;
    }

    output::section("Shutdown");
    if exit.stopped {
        output::success("Service stopped");
    } else if exit.success() {
        output::success("Service exited cleanly");
    } else {
        let code = exit.code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        output::error(&format!("Service exited with {code}"));
    }
    if exit.restarts > 0 {
        output::field("Restarts", exit.restarts);
    }
}
