//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (setup error counters)
//!
//! On scrape of /metrics:
//!     → metrics.rs renders the Prometheus recorder
//!     → resolver_stats.rs asks Unbound for statistics and appends them
//! ```
//!
//! # Design Decisions
//! - Structured fields on every log line
//! - Error classes are counters, not log-only, so lock contention can be
//!   told apart from real failures
//! - Resolver statistics are pulled at scrape time, never cached

pub mod logging;
pub mod metrics;
pub mod resolver_stats;
