//! Infrastructure layer.
//!
//! Technical concerns that support the boot without containing its logic.
//!
//! # Submodules
//!
//! - [`bootstrap`] - Composition root wiring real adapters into a toolchain
//! - [`config`] - Configuration loading and validation

pub mod bootstrap;
pub mod config;

pub use config::settings::Config;
