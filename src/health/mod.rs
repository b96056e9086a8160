//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Startup wiring:
//!     orchestrator registers "cacheapp"
//!     → resolver launched → registers "nanny"
//!
//! GET /healthz (server.rs):
//!     registry.rs polls every provider in order
//!     → {"healthy", "errors", "components"} with 200 or the fail code
//!
//! GET /liveness:
//!     200 "OK" while the server runs
//! ```
//!
//! # Design Decisions
//! - Providers are checked on request, nothing is cached
//! - The registry is an explicit value shared by clone, not a global
//! - Liveness only proves the daemon answers; readiness lives in /healthz

pub mod registry;
pub mod server;

pub use registry::{HealthCheck, HealthError, HealthRegistry, HealthReport};
pub use server::HealthServer;
