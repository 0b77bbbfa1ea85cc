//! Boot domain: hardware classes, environments, assets, and the service.

pub mod asset;
pub mod environment;
pub mod gpu;
pub mod service;
pub mod smoke;

pub use asset::{AssetKind, AssetManifest, AssetStatus, AssetTask, ExtensionManifest, TaskReport};
pub use environment::{EnvironmentMarker, RuntimeEnvironment, RuntimePin};
pub use gpu::{ArchitectureClass, Capability, GpuInfo, GpuProfile};
pub use service::{LaunchSpec, ReadyState, ServiceProcess};
pub use smoke::{SmokeCheck, SmokeReport, SmokeResult, SmokeStatus};
