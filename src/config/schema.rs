//! Resolver configuration schema.
//!
//! This module defines the structured configuration decoded from the
//! node-cache YAML document. All types derive Serde traits: `Deserialize`
//! for the document, `Serialize` for the template context.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Location of the rendered Unbound configuration.
pub const UNBOUND_CONFIG_PATH: &str = "/etc/unbound/unbound.conf";

/// Port Unbound listens on when none (or an invalid one) is configured.
pub const DEFAULT_PORT: u16 = 53;

/// Root configuration for the supervised resolver.
///
/// Each load produces a fresh value; the orchestrator replaces its copy
/// wholesale instead of mutating it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Configuration {
    /// Cache tuning.
    pub cache: CacheConfig,

    /// Zones resolved through `forward-zone` blocks.
    #[serde(rename = "forwardZones")]
    pub forward_zones: Vec<ZoneConfig>,

    /// Zones resolved through `stub-zone` blocks.
    #[serde(rename = "stubZones")]
    pub stub_zones: Vec<ZoneConfig>,

    /// Force TCP for every upstream query.
    #[serde(rename = "tcpUpstream")]
    pub tcp_upstream: bool,

    /// Round-robin rrset ordering.
    #[serde(rename = "roundRobin")]
    pub round_robin: bool,

    /// Per-query rate limit, negative means disabled.
    #[serde(rename = "rateLimit")]
    pub rate_limit: i64,

    /// Worker threads.
    #[serde(rename = "numThreads")]
    pub num_threads: u32,

    /// Unbound log verbosity.
    pub verbosity: u32,

    /// Query/reply logging toggles.
    pub logging: LoggingConfig,

    /// Listen port, injected by the nanny before rendering.
    #[serde(skip_deserializing)]
    pub port: u16,

    /// Listen addresses, injected by the nanny before rendering.
    #[serde(skip_deserializing)]
    pub interfaces: Vec<IpAddr>,

    /// Pid file path, injected by the nanny before rendering.
    #[serde(skip_deserializing)]
    pub pid: String,

    /// Auxiliary files found next to the document, by file name.
    #[serde(rename = "additionalFiles", skip_deserializing)]
    pub additional_files: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            forward_zones: Vec::new(),
            stub_zones: Vec::new(),
            tcp_upstream: false,
            round_robin: false,
            rate_limit: -1,
            num_threads: 1,
            verbosity: 0,
            logging: LoggingConfig::default(),
            port: DEFAULT_PORT,
            interfaces: Vec::new(),
            pid: String::new(),
            additional_files: Vec::new(),
        }
    }
}

impl Configuration {
    /// Whether a rate limit should be rendered.
    pub fn rate_limit_enabled(&self) -> bool {
        self.rate_limit >= 0
    }
}

/// Cache tuning knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "maxTTL")]
    pub max_ttl: u32,

    #[serde(rename = "minTTL")]
    pub min_ttl: u32,

    #[serde(rename = "negativeMaxTTL")]
    pub negative_max_ttl: u32,

    /// Refresh popular entries before they expire.
    pub prefetch: bool,

    /// Answer from expired entries while refreshing them.
    #[serde(rename = "serveExpired")]
    pub serve_expired: bool,

    #[serde(rename = "serveExpiredTTL")]
    pub serve_expired_ttl: u32,

    /// Milliseconds to wait for a fresh answer before serving an expired one.
    #[serde(rename = "serveExpiredClientTimeout")]
    pub serve_expired_client_timeout: u32,
}

/// A forward or stub zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub name: String,

    /// Upstream servers, `addr` or `addr@port`.
    pub servers: Vec<String>,

    #[serde(rename = "useTCP")]
    pub use_tcp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub queries: bool,
    pub replies: bool,
    pub servfail: bool,
}
