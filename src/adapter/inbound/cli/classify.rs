//! Handler for the `classify` command.

use std::process::ExitCode;

use serde_json::json;

use crate::adapter::inbound::cli::command::ClassifyArgs;
use crate::adapter::inbound::cli::{config, output};
use crate::application::boot::Bootstrapper;
use crate::domain::gpu::GpuProfile;
use crate::error::Result;
use crate::infrastructure::bootstrap::build_toolchain;

/// Execute the classify command.
///
/// With `--capability` the reading is classified offline; otherwise the
/// hardware is queried the same way `boot` does it.
pub async fn execute(args: &ClassifyArgs) -> Result<ExitCode> {
    let config = config::load(&args.config.config)?;
    let profile = match &args.capability {
        Some(raw) => {
            let profile = GpuProfile::classify(Some(raw));
            let toolchain = config.runtime.pin_for(profile.architecture()).toolchain;
            profile.with_toolchain(toolchain)
        }
        None => Bootstrapper::new(&config, build_toolchain(&config)?).classify().await?,
    };
    let pin = config.runtime.pin_for(profile.architecture());

    if output::is_json() {
        output::report(
            "classification",
            json!({
                "profile": profile,
                "architecture": profile.architecture(),
                "runtime": pin.full_version(),
                "index_url": pin.index_url,
                "environment": config.envs_root().join(profile.architecture().as_str()),
            }),
        );
        return Ok(ExitCode::SUCCESS);
    }

    output::field("Architecture", output::highlight(profile.architecture()));
    output::field("Capability", profile.raw_capability().unwrap_or("none"));
    if let Some(device) = profile.device() {
        output::field("Device", &device.name);
    }
    output::field("Runtime", pin.full_version());
    output::field(
        "Environment",
        config.envs_root().join(profile.architecture().as_str()).display(),
    );
    Ok(ExitCode::SUCCESS)
}
