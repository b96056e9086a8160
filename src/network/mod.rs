//! Host network setup for the node-local listen addresses.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     reconcile once → interface + rules in place before the resolver binds
//!
//! Periodic (reconciler.rs):
//!     wait for resolver pid file → reconcile → every interval: reconcile
//!
//! Shutdown:
//!     remove interface → delete every rule until none remain
//! ```
//!
//! # Design Decisions
//! - Backends are traits so tests run without root or iptables
//! - Lock contention is counted apart from other rule failures
//! - Failures are logged and counted, never fatal to the loop

pub mod backend;
pub mod interface;
pub mod iptables;
pub mod reconciler;
pub mod rules;

pub use backend::{InterfaceBackend, InterfaceError, RuleBackend, RuleError};
pub use interface::IpLinkBackend;
pub use iptables::IptablesBackend;
pub use reconciler::{InterfaceSpec, NetworkError, NetworkReconciler, ReconcileReport};
pub use rules::{build_rules, NetworkRule};
