//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! Ports are the seams between the boot logic and the outside world: the
//! hardware query, the package tool, source control, downloads, child
//! processes, and the readiness endpoint. Application services hold them as
//! trait objects so tests can substitute scripted fakes.
//!
//! # Architecture
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │      Application        │
//!                    │                         │
//!     ┌──────────────┤  Domain + Port          ├──────────────┐
//!     │              │                         │              │
//!     │              └─────────────────────────┘              │
//!     │                         │                             │
//!     ▼                         ▼                             ▼
//! ┌──────────┐           ┌─────────────┐              ┌───────────┐
//! │nvidia-smi│           │  uv / python │              │ git, HTTP │
//! │ Adapter  │           │   Adapters   │              │  Adapters │
//! └──────────┘           └─────────────┘              └───────────┘
//! ```

pub mod outbound;
