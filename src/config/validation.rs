//! Settings validation.
//!
//! Serde handles syntax; this checks the values make sense together.
//! All problems are reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::settings::DaemonSettings;

/// Linux limits interface names to IFNAMSIZ - 1 bytes.
const MAX_INTERFACE_NAME: usize = 15;

/// A single semantic problem with the settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_settings(settings: &DaemonSettings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let network = &settings.network;

    if network.bind_addresses.is_empty() {
        errors.push(ValidationError::new("network.bind_addresses", "at least one address is required"));
    } else if network
        .bind_addresses
        .iter()
        .any(|ip| ip.is_ipv6() != network.is_ipv6())
    {
        errors.push(ValidationError::new(
            "network.bind_addresses",
            "addresses must all be IPv4 or all be IPv6",
        ));
    }

    if network.interface_name.is_empty() || network.interface_name.len() > MAX_INTERFACE_NAME {
        errors.push(ValidationError::new(
            "network.interface_name",
            format!("must be 1 to {MAX_INTERFACE_NAME} characters"),
        ));
    }

    if network.interval_secs == 0 {
        errors.push(ValidationError::new("network.interval_secs", "must be greater than zero"));
    }

    if settings.sync.interval_secs == 0 {
        errors.push(ValidationError::new("sync.interval_secs", "must be greater than zero"));
    }

    if settings.health.port == 0 {
        errors.push(ValidationError::new("health.port", "must be a valid port"));
    }

    if !(400..=599).contains(&settings.health.fail_code) {
        errors.push(ValidationError::new("health.fail_code", "must be a 4xx or 5xx status"));
    }

    if settings
        .observability
        .metrics_address
        .parse::<SocketAddr>()
        .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", settings.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
