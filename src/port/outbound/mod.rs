//! Outbound ports (driven side): interfaces implemented by outbound adapters.

pub mod fetch;
pub mod hardware;
pub mod package;
pub mod probe;
pub mod process;
pub mod readiness;
