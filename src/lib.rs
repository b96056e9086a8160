//! node-cache: node-local DNS cache supervisor for Unbound.

pub mod app;
pub mod cli;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod nanny;
pub mod network;
pub mod observability;
pub mod util;

pub use app::{App, ExitReason};
pub use config::{Configuration, DaemonSettings};
pub use lifecycle::Shutdown;
