//! gpuboot - boot orchestration for GPU serving containers.
//!
//! A container starts on hardware it knows nothing about, mounts a
//! persistent volume shared with sibling containers, and must end up serving
//! the application with an accelerator runtime built for its GPU. gpuboot
//! classifies the accelerator, keeps one runtime environment per
//! architecture class on the volume, installs the pinned runtime under an
//! advisory lock, provisions extensions and model assets, launches the
//! service and waits for it to answer.
//!
//! # Architecture
//!
//! The crate follows a hexagonal layout:
//!
//! - [`domain`] - Pure types: architecture classes, environments, assets, smoke results
//! - [`port`] - Traits for the outside world (hardware, packages, processes, network)
//! - [`application`] - Boot steps built on the ports
//! - [`adapter`] - Port implementations and the operator CLI
//! - [`infrastructure`] - Configuration, logging, and adapter wiring
//!
//! # Example
//!
//! ```no_run
//! use gpuboot::application::boot::Bootstrapper;
//! use gpuboot::infrastructure::bootstrap::build_toolchain;
//! use gpuboot::infrastructure::Config;
//!
//! # async fn run() -> gpuboot::error::Result<()> {
//! let config = Config::load_or_default("/etc/gpuboot/config.toml")?;
//! let booted = Bootstrapper::new(&config, build_toolchain(&config)?).boot().await?;
//! println!("serving on port {}", booted.report.service.listen_port);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
