//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! Resolver configuration (YAML document + auxiliary files):
//!     sync.rs (read, fingerprint, decode)
//!     → Configuration (immutable snapshot)
//!     → nanny renders it for Unbound
//!
//! On every sync tick:
//!     sync.rs recomputes the fingerprint
//!     → unchanged: nothing happens
//!     → changed: new Configuration sent to the orchestrator
//!
//! Daemon settings (TOML file + command line):
//!     loader.rs (parse) → cli overrides → validation.rs → DaemonSettings
//! ```
//!
//! # Design Decisions
//! - A Configuration is never mutated once handed out; reloads replace it
//! - Every field has a default, so a missing or broken document still renders
//! - Change detection is by content hash, never by timestamps

pub mod loader;
pub mod schema;
pub mod settings;
pub mod sync;
pub mod validation;

pub use schema::{CacheConfig, Configuration, LoggingConfig, ZoneConfig};
pub use settings::DaemonSettings;
pub use sync::{ConfigSync, SyncError};
