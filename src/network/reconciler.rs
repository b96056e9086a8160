//! Network reconciliation.
//!
//! # Responsibilities
//! - Keep the NOTRACK/ACCEPT rules and the listen interface in place
//! - Count failures without stopping the periodic loop
//! - Remove everything on teardown, including duplicates left by others

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, Instant};

use crate::lifecycle::ShutdownSignal;
use crate::network::backend::{InterfaceBackend, InterfaceError, RuleBackend, RuleError};
use crate::network::rules::NetworkRule;
use crate::observability::metrics::{self, SetupError};
use crate::util::is_file_present;

/// Upper bound on delete passes for a single rule during teardown.
pub const MAX_TEARDOWN_PASSES: usize = 32;

const PID_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to remove rule: {0}")]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Interface(#[from] InterfaceError),

    #[error("rule still present after {MAX_TEARDOWN_PASSES} passes: {rule}")]
    GaveUp { rule: String },
}

/// Name and addresses of the dummy interface node-cache listens on.
#[derive(Debug, Clone)]
pub struct InterfaceSpec {
    pub name: String,
    pub addresses: Vec<IpAddr>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub existing: usize,
    pub added: usize,
    pub lock_errors: usize,
    pub other_errors: usize,
    pub interface_error: Option<SetupError>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.lock_errors == 0 && self.other_errors == 0 && self.interface_error.is_none()
    }
}

#[derive(Default)]
pub struct NetworkReconciler {
    rules: Vec<NetworkRule>,
    rule_backend: Option<Arc<dyn RuleBackend>>,
    interface: Option<(InterfaceSpec, Arc<dyn InterfaceBackend>)>,
}

impl NetworkReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(mut self, backend: Arc<dyn RuleBackend>, rules: Vec<NetworkRule>) -> Self {
        self.rule_backend = Some(backend);
        self.rules = rules;
        self
    }

    pub fn with_interface(mut self, backend: Arc<dyn InterfaceBackend>, spec: InterfaceSpec) -> Self {
        self.interface = Some((spec, backend));
        self
    }

    pub fn rules(&self) -> &[NetworkRule] {
        &self.rules
    }

    /// Bring the host in line with the desired state once.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if let Some(backend) = &self.rule_backend {
            self.ensure_rules(backend.as_ref(), &mut report).await;
        }

        if let Some((spec, backend)) = &self.interface {
            match backend.ensure_dummy(&spec.name, &spec.addresses).await {
                Ok(true) => {}
                Ok(false) => tracing::info!(interface = %spec.name, "Added interface"),
                Err(e) => {
                    let kind = match e {
                        InterfaceError::Add { .. } => SetupError::InterfaceAdd,
                        _ => SetupError::InterfaceCheck,
                    };
                    tracing::error!(interface = %spec.name, error = %e, "Error setting up interface");
                    metrics::publish_error(kind);
                    report.interface_error = Some(kind);
                }
            }
        }

        report
    }

    async fn ensure_rules(&self, backend: &dyn RuleBackend, report: &mut ReconcileReport) {
        for rule in &self.rules {
            match backend.ensure_rule(rule).await {
                Ok(true) => {
                    tracing::debug!(rule = %rule, "iptables rule already exists");
                    report.existing += 1;
                }
                Ok(false) => {
                    tracing::info!(rule = %rule, "Added back nodelocaldns rule");
                    report.added += 1;
                }
                Err(e) => record_rule_error(rule, &e, "Error checking/adding iptables rule", report),
            }
        }
    }

    /// Remove the interface and every instance of every rule.
    ///
    /// Keeps going after a failure and returns the first error seen.
    pub async fn teardown(&self) -> Result<(), NetworkError> {
        let mut first_error = None;

        if let Some((spec, backend)) = &self.interface {
            if let Err(e) = backend.remove_dummy(&spec.name).await {
                tracing::error!(interface = %spec.name, error = %e, "Failed to remove interface");
                first_error.get_or_insert(NetworkError::from(e));
            }
        }

        if let Some(backend) = &self.rule_backend {
            let mut report = ReconcileReport::default();
            for rule in &self.rules {
                if let Err(e) = remove_all(backend.as_ref(), rule, &mut report).await {
                    tracing::error!(rule = %rule, error = %e, "Failed to remove iptables rule");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("Network teardown complete");
                Ok(())
            }
        }
    }

    /// Reconcile every `interval` until shutdown.
    ///
    /// With `pid_path` set, the first pass waits until the resolver has
    /// written its pid file so the rules never point at a dead listener.
    pub async fn run_periodic(
        self: Arc<Self>,
        pid_path: Option<PathBuf>,
        interval: Duration,
        mut shutdown: ShutdownSignal,
    ) {
        if let Some(path) = pid_path {
            let mut poll = time::interval(PID_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        if is_file_present(&path) {
                            break;
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Shutdown before resolver started, skipping reconciliation");
                        return;
                    }
                }
            }
            self.reconcile().await;
        }

        tracing::info!(interval = ?interval, "Network reconciler starting");
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reconcile().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Network reconciler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

fn rule_error_kind(e: &RuleError) -> SetupError {
    if e.is_lock() {
        SetupError::IptablesLock
    } else {
        SetupError::Iptables
    }
}

/// Log, publish and count one failed rule operation.
fn record_rule_error(rule: &NetworkRule, e: &RuleError, msg: &str, report: &mut ReconcileReport) {
    let kind = rule_error_kind(e);
    match kind {
        SetupError::IptablesLock => {
            tracing::warn!(rule = %rule, error = %e, "{msg}");
            report.lock_errors += 1;
        }
        _ => {
            tracing::error!(rule = %rule, error = %e, "{msg}");
            report.other_errors += 1;
        }
    }
    metrics::publish_error(kind);
}

/// Delete `rule` until the backend reports it gone.
///
/// A failed call is counted in `report` and retried on the next pass.
async fn remove_all(
    backend: &dyn RuleBackend,
    rule: &NetworkRule,
    report: &mut ReconcileReport,
) -> Result<(), NetworkError> {
    const MSG: &str = "Error removing iptables rule";
    let mut last_error = None;

    for _ in 0..MAX_TEARDOWN_PASSES {
        if let Err(e) = backend.delete_rule(rule).await {
            record_rule_error(rule, &e, MSG, report);
            last_error = Some(e);
            continue;
        }
        // ensure re-inserts an absent rule, so undo that below
        match backend.ensure_rule(rule).await {
            Ok(true) => {}
            Ok(false) => match backend.delete_rule(rule).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    record_rule_error(rule, &e, MSG, report);
                    last_error = Some(e);
                }
            },
            Err(e) => {
                record_rule_error(rule, &e, MSG, report);
                last_error = Some(e);
            }
        }
    }

    if let Err(e) = backend.delete_rule(rule).await {
        record_rule_error(rule, &e, MSG, report);
        last_error = Some(e);
    }
    Err(match last_error {
        Some(e) => NetworkError::Rule(e),
        None => NetworkError::GaveUp {
            rule: rule.to_string(),
        },
    })
}
