//! Command-line flags.
//!
//! Every flag is optional and overrides the matching field of the
//! settings file (or the built-in default when no file is given).

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::DaemonSettings;

#[derive(Debug, Default, Parser)]
#[command(name = "node-cache")]
#[command(about = "Node-local DNS cache supervisor for Unbound", long_about = None)]
pub struct Args {
    /// TOML settings file, applied before the flags below
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// YAML document with the resolver configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory of files included verbatim in the resolver configuration
    #[arg(long)]
    pub additional_files_dir: Option<PathBuf>,

    /// How often the configuration document is checked for changes
    #[arg(long)]
    pub sync_interval_secs: Option<u64>,

    /// How often interface and iptables rules are checked
    #[arg(long)]
    pub net_sync_interval_secs: Option<u64>,

    /// Comma-separated listen addresses, all of one family
    #[arg(long, value_delimiter = ',')]
    pub bind_address: Option<Vec<IpAddr>>,

    #[arg(long)]
    pub metrics_listen_address: Option<String>,

    #[arg(long)]
    pub metrics_enabled: Option<bool>,

    #[arg(long)]
    pub template_path: Option<PathBuf>,

    #[arg(long)]
    pub pid_path: Option<PathBuf>,

    #[arg(long)]
    pub setup_interface: Option<bool>,

    #[arg(long)]
    pub setup_iptables: Option<bool>,

    #[arg(long)]
    pub interface_name: Option<String>,

    #[arg(long)]
    pub health_port: Option<u16>,

    /// Status code for a failing /healthz
    #[arg(long)]
    pub health_fail_code: Option<u16>,

    #[arg(long)]
    pub health_shutdown_grace_secs: Option<u64>,

    /// Port the resolver listens on for DNS requests
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub unbound_exec: Option<PathBuf>,

    #[arg(long)]
    pub unbound_checkconf_exec: Option<PathBuf>,

    #[arg(long)]
    pub unbound_control_socket: Option<PathBuf>,

    /// Where the rendered resolver configuration is written
    #[arg(long)]
    pub rendered_config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long)]
    pub log_level: Option<String>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl Args {
    /// Overlay the flags that were given onto `settings`.
    pub fn apply(self, mut settings: DaemonSettings) -> DaemonSettings {
        let s = &mut settings;

        set(&mut s.sync.config_file, self.config);
        if self.additional_files_dir.is_some() {
            s.sync.additional_files_dir = self.additional_files_dir;
        }
        set(&mut s.sync.interval_secs, self.sync_interval_secs);

        set(&mut s.network.interval_secs, self.net_sync_interval_secs);
        set(&mut s.network.bind_addresses, self.bind_address);
        set(&mut s.network.setup_interface, self.setup_interface);
        set(&mut s.network.setup_iptables, self.setup_iptables);
        set(&mut s.network.interface_name, self.interface_name);

        set(&mut s.observability.metrics_address, self.metrics_listen_address);
        set(&mut s.observability.metrics_enabled, self.metrics_enabled);
        set(&mut s.observability.log_level, self.log_level);

        set(&mut s.health.port, self.health_port);
        set(&mut s.health.fail_code, self.health_fail_code);
        set(&mut s.health.shutdown_grace_secs, self.health_shutdown_grace_secs);

        set(&mut s.resolver.template_path, self.template_path);
        set(&mut s.resolver.pid_path, self.pid_path);
        set(&mut s.resolver.port, self.port);
        set(&mut s.resolver.exec, self.unbound_exec);
        set(&mut s.resolver.checkconf_exec, self.unbound_checkconf_exec);
        set(&mut s.resolver.control_socket, self.unbound_control_socket);
        set(&mut s.resolver.rendered_config_path, self.rendered_config);

        settings
    }
}
