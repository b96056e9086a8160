//! Daemon settings.
//!
//! These describe how node-cache itself runs (paths, ports, intervals),
//! as opposed to [`Configuration`](crate::config::Configuration) which is
//! rendered for Unbound. Every field has a default so a missing settings
//! file is equivalent to an empty one.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings for the daemon.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Resolver binaries and files.
    pub resolver: ResolverSettings,

    /// Configuration document polling.
    pub sync: SyncSettings,

    /// Interface and packet-filter setup.
    pub network: NetworkSettings,

    /// Health endpoint.
    pub health: HealthSettings,

    /// Logging and metrics.
    pub observability: ObservabilitySettings,
}

/// Resolver process settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Path to the `unbound` binary.
    pub exec: PathBuf,

    /// Path to the `unbound-checkconf` binary.
    pub checkconf_exec: PathBuf,

    /// Port to listen on for DNS requests.
    pub port: u16,

    /// Pid file written by Unbound.
    pub pid_path: PathBuf,

    /// Template rendered into the Unbound configuration.
    pub template_path: PathBuf,

    /// Where the rendered configuration is written.
    pub rendered_config_path: PathBuf,

    /// Unbound remote-control socket used for statistics.
    pub control_socket: PathBuf,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            exec: PathBuf::from("/usr/local/sbin/unbound"),
            checkconf_exec: PathBuf::from("/usr/local/sbin/unbound-checkconf"),
            port: 53,
            pid_path: PathBuf::from("/var/run/unbound.pid"),
            template_path: PathBuf::from("/etc/unbound/unbound.conf.tmpl"),
            rendered_config_path: PathBuf::from(crate::config::schema::UNBOUND_CONFIG_PATH),
            control_socket: PathBuf::from("/var/run/unbound-control.sock"),
        }
    }
}

/// Configuration document settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncSettings {
    /// YAML document describing the resolver configuration.
    pub config_file: PathBuf,

    /// Directory of plain files included verbatim by the template.
    pub additional_files_dir: Option<PathBuf>,

    /// Poll interval in seconds.
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("/etc/unbound/unbound.yaml"),
            additional_files_dir: None,
            interval_secs: 10,
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Network setup settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Addresses the resolver listens on. All must share a family.
    pub bind_addresses: Vec<IpAddr>,

    /// Create the dummy listen interface.
    pub setup_interface: bool,

    /// Install the NOTRACK/ACCEPT rules.
    pub setup_iptables: bool,

    /// Name of the dummy interface.
    pub interface_name: String,

    /// Reconciliation interval in seconds.
    pub interval_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_addresses: vec![IpAddr::V4(Ipv4Addr::new(169, 254, 25, 10))],
            setup_interface: true,
            setup_iptables: true,
            interface_name: "nodelocaldns".to_string(),
            interval_secs: 60,
        }
    }
}

impl NetworkSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Addresses are validated to share a family, so the first one decides.
    pub fn is_ipv6(&self) -> bool {
        self.bind_addresses.first().is_some_and(IpAddr::is_ipv6)
    }
}

/// Health endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Port for `/healthz` and `/liveness`.
    pub port: u16,

    /// Status code returned when unhealthy.
    pub fail_code: u16,

    /// Seconds in-flight requests get on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            port: 9254,
            fail_code: 503,
            shutdown_grace_secs: 30,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`.
    pub log_level: String,

    /// Enable the metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9253".to_string(),
        }
    }
}
