//! Health provider registry.
//!
//! Providers are appended while the health server is already answering
//! requests (the nanny only registers once Unbound is launched), so the
//! list is swapped copy-on-write instead of locked.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;

/// Why a component is unhealthy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HealthError(pub String);

impl HealthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Anything that can report its own health.
pub trait HealthCheck: Send + Sync {
    fn health_check(&self) -> Result<(), HealthError>;
}

#[derive(Clone)]
pub struct Provider {
    pub name: String,
    pub check: Arc<dyn HealthCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub name: String,
    pub healthy: bool,
}

/// Aggregated response for `/healthz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub errors: Vec<ErrorEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<Component>>,
}

/// Ordered, append-only set of health providers.
#[derive(Clone)]
pub struct HealthRegistry {
    providers: Arc<ArcSwap<Vec<Provider>>>,
    detailed: bool,
}

impl HealthRegistry {
    /// `detailed` adds per-component status to every report.
    pub fn new(detailed: bool) -> Self {
        Self {
            providers: Arc::new(ArcSwap::from_pointee(Vec::new())),
            detailed,
        }
    }

    pub fn register(&self, name: impl Into<String>, check: Arc<dyn HealthCheck>) {
        let provider = Provider {
            name: name.into(),
            check,
        };
        tracing::debug!(provider = %provider.name, "Registering health provider");

        self.providers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(provider.clone());
            next
        });
    }

    pub fn len(&self) -> usize {
        self.providers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poll every provider in registration order.
    ///
    /// With no providers the report is healthy.
    pub fn report(&self) -> HealthReport {
        let providers = self.providers.load();
        let mut errors = Vec::new();
        let mut components = Vec::with_capacity(providers.len());

        for provider in providers.iter() {
            let healthy = match provider.check.health_check() {
                Ok(()) => true,
                Err(e) => {
                    errors.push(ErrorEntry {
                        name: provider.name.clone(),
                        message: e.to_string(),
                    });
                    false
                }
            };
            components.push(Component {
                name: provider.name.clone(),
                healthy,
            });
        }

        HealthReport {
            healthy: errors.is_empty(),
            errors,
            components: self.detailed.then_some(components),
        }
    }
}
