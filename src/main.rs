//! node-cache
//!
//! Runs Unbound as a node-local DNS cache.
//!
//! # Architecture Overview
//!
//! ```text
//!    config file ──▶ ConfigSync ──(changed)──┐
//!                                            ▼
//!    SIGHUP/SIGTERM ──────────────────▶  App (select loop) ──▶ Nanny ──▶ unbound -d -c
//!                                            ▲                   │
//!    unbound exit ───────────────────────────┘◀──────────────────┘
//!
//!    NetworkReconciler: dummy interface + NOTRACK/ACCEPT rules, every interval
//!    HealthServer:      /healthz, /liveness
//!    Metrics:           /metrics (setup errors + Unbound statistics)
//! ```

use std::sync::Arc;

use clap::Parser;

use node_cache::cli::Args;
use node_cache::config::loader::{check_settings, load_settings};
use node_cache::config::DaemonSettings;
use node_cache::lifecycle::signals::spawn_signal_bridge;
use node_cache::network::{IpLinkBackend, IptablesBackend};
use node_cache::observability::logging;
use node_cache::App;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = Args::parse();

    let settings = match args.settings.take() {
        Some(path) => load_settings(&path)?,
        None => DaemonSettings::default(),
    };
    let settings = args.apply(settings);
    check_settings(&settings)?;

    logging::init(&settings.observability.log_level)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_addresses = ?settings.network.bind_addresses,
        port = settings.resolver.port,
        health_port = settings.health.port,
        config = %settings.sync.config_file.display(),
        "node-cache starting"
    );

    let rule_backend = Arc::new(IptablesBackend::new(settings.network.is_ipv6()));
    let interface_backend = Arc::new(IpLinkBackend::new());
    let signals = spawn_signal_bridge()?;

    let reason = App::new(settings, rule_backend, interface_backend)
        .run(signals)
        .await;

    std::process::exit(reason.code());
}
