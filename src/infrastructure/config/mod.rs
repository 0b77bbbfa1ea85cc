//! Infrastructure configuration modules.

pub mod logging;
pub mod provisioning;
pub mod runtime;
pub mod service;
pub mod settings;
pub mod volume;
