//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → SignalEvent::Terminate → teardown, exit 0
//!     SIGHUP         → SignalEvent::Reload    → re-render, reload resolver
//!
//! Shutdown (shutdown.rs):
//!     Orchestrator exits its loop → trigger()
//!     → reconciler, health server and metrics server stop
//! ```
//!
//! # Design Decisions
//! - Signals become events on a channel; the orchestrator selects on it
//! - Shutdown is level-triggered, late subscribers still observe it
//! - The resolver is never killed on shutdown, only abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::SignalEvent;
