//! HTTP server for `/healthz` and `/liveness`.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::health::registry::HealthRegistry;
use crate::lifecycle::ShutdownSignal;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct HealthState {
    registry: HealthRegistry,
    fail_code: StatusCode,
}

/// A bound but not yet serving health server.
pub struct HealthServer {
    listener: TcpListener,
    router: Router,
}

impl HealthServer {
    /// Bind the listener. An invalid `fail_code` falls back to 503.
    pub async fn bind(
        addr: SocketAddr,
        registry: HealthRegistry,
        fail_code: u16,
    ) -> std::io::Result<Self> {
        let fail_code = StatusCode::from_u16(fail_code).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        let listener = TcpListener::bind(addr).await?;
        let router = Self::build_router(HealthState { registry, fail_code });
        Ok(Self { listener, router })
    }

    #[allow(deprecated)]
    fn build_router(state: HealthState) -> Router {
        Router::new()
            .route("/healthz", get(healthz_handler))
            .route("/liveness", get(liveness_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(TraceLayer::new_for_http())
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until shutdown is triggered.
    pub fn spawn(self, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let addr = self.listener.local_addr().ok();
            tracing::info!(address = ?addr, "Health server listening");

            let result = axum::serve(self.listener, self.router)
                .with_graceful_shutdown(async move {
                    shutdown.recv().await;
                    tracing::info!("Health server shutting down");
                })
                .await;

            match result {
                Ok(()) => tracing::debug!("Health server stopped"),
                Err(e) => tracing::error!(error = %e, "Health server failed"),
            }
        })
    }
}

/// Wait for a stopping HTTP server task, aborting it after `grace`.
pub async fn stop_within(handle: JoinHandle<()>, grace: Duration) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(grace, handle).await.is_err() {
        tracing::warn!(grace = ?grace, "Server did not drain in time, closing");
        abort.abort();
    }
}

async fn healthz_handler(State(state): State<HealthState>) -> Response {
    let report = state.registry.report();
    let status = if report.healthy {
        StatusCode::OK
    } else {
        state.fail_code
    };
    (status, Json(report)).into_response()
}

async fn liveness_handler() -> &'static str {
    "OK"
}
