//! Handler for the `status` command.

use std::process::ExitCode;

use serde_json::json;

use crate::adapter::inbound::cli::command::ConfigPathArg;
use crate::adapter::inbound::cli::{config, output};
use crate::application::lock::FileLock;
use crate::application::registry::read_marker;
use crate::domain::environment::RuntimeEnvironment;
use crate::domain::gpu::ArchitectureClass;
use crate::error::Result;
use crate::infrastructure::config::settings::Config;

/// Execute the status command.
pub fn execute(args: &ConfigPathArg) -> Result<ExitCode> {
    let config = config::load(&args.config)?;
    let alias = std::fs::read_link(config.legacy_alias()).ok();
    let environments: Vec<_> = ArchitectureClass::ALL
        .into_iter()
        .map(|class| RuntimeEnvironment::new(config.envs_root().join(class.as_str()), class))
        .filter(|env| env.path().exists())
        .collect();

    if output::is_json() {
        let entries: Vec<_> = environments
            .iter()
            .map(|env| {
                json!({
                    "architecture": env.architecture(),
                    "path": env.path(),
                    "interpreter": env.has_interpreter(),
                    "marker": read_marker(env),
                    "lock": lock_for(&config, env).holder(),
                })
            })
            .collect();
        output::report(
            "status",
            json!({
                "volume": config.volume.root,
                "volume_present": config.volume.root.is_dir(),
                "alias": alias,
                "environments": entries,
            }),
        );
        return Ok(ExitCode::SUCCESS);
    }

    output::header(env!("CARGO_PKG_VERSION"));
    output::field("Volume", config.volume.root.display());
    if !config.volume.root.is_dir() {
        output::warning("shared volume is not mounted");
        return Ok(ExitCode::SUCCESS);
    }
    output::field(
        "Alias",
        alias.map_or_else(|| output::muted("(none)"), |target| target.display().to_string()),
    );

    output::section("Environments");
    if environments.is_empty() {
        output::note("(none created)");
        output::hint("run `gpuboot boot` to create one");
    }
    for env in &environments {
        let summary = match read_marker(env) {
            Some(marker) => format!(
                "{} verified {}",
                marker.runtime_version,
                marker.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None if env.has_interpreter() => "not verified".to_string(),
            None => output::negative("incomplete"),
        };
        output::field(env.architecture().as_str(), summary);

        let lock = lock_for(&config, env);
        if let Some(holder) = lock.holder() {
            output::warning(&format!(
                "install lock held by pid {} on {} for {}s{}",
                holder.pid,
                holder.hostname,
                holder.age().as_secs(),
                if lock.is_stale() { " (stale)" } else { "" }
            ));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn lock_for(config: &Config, env: &RuntimeEnvironment) -> FileLock {
    FileLock::for_environment(
        env,
        config.runtime.lock_timeout(),
        config.runtime.lock_poll_interval(),
    )
}
