//! Application services (use cases).
//!
//! Each step of the boot is its own service over the outbound ports;
//! [`boot::Bootstrapper`] strings them together.

pub mod boot;
pub mod install;
pub mod launch;
pub mod lock;
pub mod provision;
pub mod registry;
pub mod secondary;
pub mod smoke;
pub mod supervisor;
pub mod toolchain;
