//! The node-cache orchestrator.
//!
//! Owns the resolver configuration and the nanny, and arbitrates between
//! OS signals, resolver exit and configuration changes. Every way out of
//! [`App::run`] goes through the same teardown.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ConfigSync, Configuration, DaemonSettings};
use crate::health::server::stop_within;
use crate::health::{HealthCheck, HealthError, HealthRegistry, HealthServer};
use crate::lifecycle::{Shutdown, SignalEvent};
use crate::nanny::{Nanny, NannyError, NannyOptions, ResolverTemplate, TemplateError};
use crate::network::{
    build_rules, InterfaceBackend, InterfaceSpec, NetworkReconciler, RuleBackend,
};
use crate::observability::metrics::serve_metrics;
use crate::observability::resolver_stats::UnboundExporter;

/// Why [`App::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// SIGTERM or SIGINT.
    Terminated,
    /// The resolver could not be configured or launched.
    StartupFailed,
    /// The resolver process ended on its own.
    ResolverExited,
}

impl ExitReason {
    pub fn code(self) -> i32 {
        match self {
            ExitReason::Terminated => 0,
            ExitReason::StartupFailed => 1,
            ExitReason::ResolverExited => 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to start health server on {addr}: {source}")]
    HealthBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("error getting unbound template: {0}")]
    Template(#[from] TemplateError),

    #[error("could not start Unbound with initial configuration: {0}")]
    Nanny(#[from] NannyError),
}

/// Health of the daemon itself: the last non-fatal startup error.
struct AppHealth {
    last_error: watch::Receiver<Option<String>>,
}

impl HealthCheck for AppHealth {
    fn health_check(&self) -> Result<(), HealthError> {
        match self.last_error.borrow().as_deref() {
            Some(message) => Err(HealthError::new(message)),
            None => Ok(()),
        }
    }
}

/// Background tasks the finalizer has to stop.
#[derive(Default)]
struct Tasks {
    health: Option<JoinHandle<()>>,
    metrics: Option<JoinHandle<()>>,
    reconciler: Option<JoinHandle<()>>,
}

pub struct App {
    settings: DaemonSettings,
    reconciler: Arc<NetworkReconciler>,
    registry: HealthRegistry,
    shutdown: Shutdown,
}

impl App {
    pub fn new(
        settings: DaemonSettings,
        rule_backend: Arc<dyn RuleBackend>,
        interface_backend: Arc<dyn InterfaceBackend>,
    ) -> Self {
        let network = &settings.network;
        let mut reconciler = NetworkReconciler::new();
        if network.setup_iptables {
            let rules = build_rules(
                &network.bind_addresses,
                settings.resolver.port,
                settings.health.port,
            );
            reconciler = reconciler.with_rules(rule_backend, rules);
        }
        if network.setup_interface {
            tracing::info!(addresses = ?network.bind_addresses, "Setup dummy network interface");
            reconciler = reconciler.with_interface(
                interface_backend,
                InterfaceSpec {
                    name: network.interface_name.clone(),
                    addresses: network.bind_addresses.clone(),
                },
            );
        }

        Self {
            settings,
            reconciler: Arc::new(reconciler),
            registry: HealthRegistry::new(true),
            shutdown: Shutdown::new(),
        }
    }

    /// Run until terminated, the resolver exits, or startup fails.
    pub async fn run(self, signals: mpsc::Receiver<SignalEvent>) -> ExitReason {
        let mut tasks = Tasks::default();

        let reason = match self.serve(signals, &mut tasks).await {
            Ok(reason) => reason,
            Err(e) => {
                tracing::error!(error = %e, "Startup failed");
                ExitReason::StartupFailed
            }
        };

        self.finish(tasks).await;
        tracing::info!(reason = ?reason, code = reason.code(), "node-cache exiting");
        reason
    }

    async fn serve(
        &self,
        mut signals: mpsc::Receiver<SignalEvent>,
        tasks: &mut Tasks,
    ) -> Result<ExitReason, AppError> {
        let settings = &self.settings;

        let (health_tx, health_rx) = watch::channel(None);
        self.registry
            .register("cacheapp", Arc::new(AppHealth { last_error: health_rx }));

        let health_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.health.port));
        let server = HealthServer::bind(health_addr, self.registry.clone(), settings.health.fail_code)
            .await
            .map_err(|source| AppError::HealthBind {
                addr: health_addr,
                source,
            })?;
        tasks.health = Some(server.spawn(self.shutdown.subscribe()));

        self.reconciler.reconcile().await;

        if settings.observability.metrics_enabled {
            tasks.metrics = self.start_metrics(&health_tx).await;
        }

        let mut sync = ConfigSync::new(
            &settings.sync.config_file,
            settings.sync.additional_files_dir.clone(),
            settings.sync.interval(),
        );
        let (mut current, err) = sync.load_once().await;
        if let Some(e) = err {
            tracing::error!(error = %e, "Error getting initial config, using default");
        }

        let template = self.load_template()?;

        tasks.reconciler = Some(tokio::spawn(self.reconciler.clone().run_periodic(
            Some(settings.resolver.pid_path.clone()),
            settings.network.interval(),
            self.shutdown.subscribe(),
        )));

        let mut nanny = Nanny::new(self.nanny_options(), template);
        nanny.configure(current.clone())?;
        nanny.start().await?;
        self.registry.register("nanny", Arc::new(nanny.health_probe()));

        let Some(mut exit) = nanny.take_exit() else {
            return Err(AppError::Nanny(NannyError::NotRunning));
        };
        let mut configs = sync.start_periodic();

        loop {
            tokio::select! {
                Some(event) = signals.recv() => match event {
                    SignalEvent::Terminate => {
                        tracing::info!("Got SIGTERM. Will exit");
                        return Ok(ExitReason::Terminated);
                    }
                    SignalEvent::Reload => {
                        tracing::info!("Got SIGHUP. Will reload all configs and templates");
                        match self.load_template() {
                            Ok(template) => nanny.set_template(template),
                            Err(e) => tracing::error!(error = %e, "Keeping previous template"),
                        }
                        self.apply(&nanny, &current);
                    }
                },
                outcome = &mut exit => {
                    match outcome {
                        Ok(outcome) => tracing::error!(status = %outcome, "unbound exited"),
                        Err(_) => tracing::error!("unbound exit status lost"),
                    }
                    return Ok(ExitReason::ResolverExited);
                }
                Some(config) = configs.recv() => {
                    tracing::info!("Reloading unbound with new configuration");
                    current = config;
                    self.apply(&nanny, &current);
                }
            }
        }
    }

    /// Render `config` and signal the resolver. Failures are logged by the nanny.
    fn apply(&self, nanny: &Nanny, config: &Configuration) {
        if nanny.configure(config.clone()).is_ok() {
            let _ = nanny.reload();
        }
    }

    fn load_template(&self) -> Result<ResolverTemplate, TemplateError> {
        let resolver = &self.settings.resolver;
        Ok(ResolverTemplate::load(&resolver.template_path)?
            .with_control_socket(&resolver.control_socket)
            .with_additional_files_dir(self.settings.sync.additional_files_dir.clone()))
    }

    fn nanny_options(&self) -> NannyOptions {
        let resolver = &self.settings.resolver;
        NannyOptions {
            exec: resolver.exec.clone(),
            checkconf_exec: resolver.checkconf_exec.clone(),
            addresses: self.settings.network.bind_addresses.clone(),
            port: resolver.port,
            pid_path: resolver.pid_path.clone(),
            config_path: resolver.rendered_config_path.clone(),
        }
    }

    /// Start the metrics endpoint. Failure marks the daemon unhealthy but
    /// does not stop it.
    async fn start_metrics(&self, health: &watch::Sender<Option<String>>) -> Option<JoinHandle<()>> {
        let observability = &self.settings.observability;
        let addr: SocketAddr = match observability.metrics_address.parse() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::error!(metrics_address = %observability.metrics_address, error = %e, "Failed to parse metrics address");
                health.send_replace(Some(format!("invalid metrics address: {e}")));
                return None;
            }
        };

        let exporter = UnboundExporter::new(&self.settings.resolver.control_socket);
        match serve_metrics(addr, exporter, self.shutdown.subscribe()).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "Failed to start metrics server");
                health.send_replace(Some(e.to_string()));
                None
            }
        }
    }

    async fn finish(&self, tasks: Tasks) {
        tracing::info!("Tearing down");
        self.shutdown.trigger();

        if let Some(handle) = tasks.reconciler {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Network reconciler task failed");
            }
        }

        let grace = Duration::from_secs(self.settings.health.shutdown_grace_secs);
        if let Some(handle) = tasks.health {
            stop_within(handle, grace).await;
        }
        if let Some(handle) = tasks.metrics {
            stop_within(handle, grace).await;
        }

        if let Err(e) = self.reconciler.teardown().await {
            tracing::error!(error = %e, "Network teardown incomplete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitReason::Terminated.code(), 0);
        assert_eq!(ExitReason::StartupFailed.code(), 1);
        assert_eq!(ExitReason::ResolverExited.code(), 2);
    }

    #[test]
    fn test_app_health_reports_last_error() {
        let (tx, rx) = watch::channel(None);
        let health = AppHealth { last_error: rx };
        assert!(health.health_check().is_ok());

        tx.send_replace(Some("failed to bind metrics listener".to_string()));
        assert_eq!(
            health.health_check().unwrap_err().to_string(),
            "failed to bind metrics listener"
        );
    }
}
