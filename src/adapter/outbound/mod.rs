//! Outbound adapters (driven side).

pub mod command;
pub mod download;
pub mod git;
pub mod nvidia;
pub mod process;
pub mod python;
pub mod readiness;
pub mod uv;
