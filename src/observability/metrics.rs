//! Metrics collection and exposition.
//!
//! # Metrics
//! - `unbound_nodecache_setup_errors_total{errortype}` (counter): failures
//!   during network setup and configuration rendering
//! - `unbound_nodecache_*` resolver statistics, scraped on demand from the
//!   Unbound control socket (see [`resolver_stats`](super::resolver_stats))
//!
//! The Prometheus recorder is installed without its own listener. `/metrics`
//! is served by axum so the resolver statistics land in the same scrape.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::lifecycle::ShutdownSignal;
use crate::observability::resolver_stats::UnboundExporter;

const SETUP_ERRORS: &str = "unbound_nodecache_setup_errors_total";

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

static PROMETHEUS: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Error classes counted by `unbound_nodecache_setup_errors_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    /// Rule management failed for a reason other than lock contention.
    Iptables,
    /// The rule tool could not take the xtables lock.
    IptablesLock,
    InterfaceAdd,
    InterfaceCheck,
    /// Rendering or writing the resolver configuration failed.
    Config,
}

impl SetupError {
    pub const ALL: [SetupError; 5] = [
        SetupError::Iptables,
        SetupError::IptablesLock,
        SetupError::InterfaceAdd,
        SetupError::InterfaceCheck,
        SetupError::Config,
    ];

    pub fn as_label(self) -> &'static str {
        match self {
            SetupError::Iptables => "iptables",
            SetupError::IptablesLock => "iptables_lock",
            SetupError::InterfaceAdd => "interface_add",
            SetupError::InterfaceCheck => "interface_check",
            SetupError::Config => "config",
        }
    }
}

/// Count one setup error.
pub fn publish_error(kind: SetupError) {
    counter!(SETUP_ERRORS, "errortype" => kind.as_label()).increment(1);
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: {0}")]
    Recorder(#[from] BuildError),

    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Install the process-wide Prometheus recorder, once.
pub fn prometheus_handle() -> Result<PrometheusHandle, MetricsError> {
    let mut installed = PROMETHEUS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = installed.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *installed = Some(handle.clone());

    describe_counter!(
        SETUP_ERRORS,
        "The number of errors during periodic network setup for node-cache"
    );
    for kind in SetupError::ALL {
        counter!(SETUP_ERRORS, "errortype" => kind.as_label()).increment(0);
    }

    Ok(handle)
}

#[derive(Clone)]
struct MetricsState {
    handle: PrometheusHandle,
    exporter: Arc<UnboundExporter>,
}

/// Bind the metrics listener and serve `/metrics` until shutdown.
pub async fn serve_metrics(
    addr: SocketAddr,
    exporter: UnboundExporter,
    mut shutdown: ShutdownSignal,
) -> Result<JoinHandle<()>, MetricsError> {
    let handle = prometheus_handle()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| MetricsError::Bind { addr, source })?;

    let state = MetricsState {
        handle,
        exporter: Arc::new(exporter),
    };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    tracing::info!(address = %addr, "Started metrics server");

    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.recv().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Metrics server failed");
        }
    }))
}

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    let mut body = state.handle.render();
    body.push_str(&state.exporter.scrape().await);
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}
