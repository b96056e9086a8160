//! Packet-filter rules owned by node-cache.

use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Raw,
    Filter,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Raw => "raw",
            Table::Filter => "filter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Prerouting,
    Input,
    Output,
}

impl Chain {
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Prerouting => "PREROUTING",
            Chain::Input => "INPUT",
            Chain::Output => "OUTPUT",
        }
    }
}

/// One fully specified rule: table, chain and match arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkRule {
    pub table: Table,
    pub chain: Chain,
    pub args: Vec<String>,
}

impl NetworkRule {
    fn new(table: Table, chain: Chain, args: &[&str]) -> Self {
        Self {
            table,
            chain,
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for NetworkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-t {} {} {}", self.table.as_str(), self.chain.as_str(), self.args.join(" "))
    }
}

/// The complete rule set for the given listen addresses.
///
/// Per address: NOTRACK for DNS traffic in both directions (including
/// locally generated queries), ACCEPT in the filter table for the same
/// untracked flows, and NOTRACK for the health port.
pub fn build_rules(addresses: &[IpAddr], port: u16, health_port: u16) -> Vec<NetworkRule> {
    use Chain::{Input, Output, Prerouting};
    use Table::{Filter, Raw};

    let port = port.to_string();
    let health = health_port.to_string();
    let mut rules = Vec::with_capacity(addresses.len() * 12);

    for addr in addresses {
        let ip = addr.to_string();
        let ip = ip.as_str();
        let port = port.as_str();
        let health = health.as_str();

        for proto in ["tcp", "udp"] {
            rules.push(NetworkRule::new(Raw, Prerouting, &["-p", proto, "-d", ip, "--dport", port, "-j", "NOTRACK"]));
        }
        for proto in ["tcp", "udp"] {
            rules.push(NetworkRule::new(Filter, Input, &["-p", proto, "-d", ip, "--dport", port, "-j", "ACCEPT"]));
        }
        for proto in ["tcp", "udp"] {
            rules.push(NetworkRule::new(Raw, Output, &["-p", proto, "-s", ip, "--sport", port, "-j", "NOTRACK"]));
        }
        for proto in ["tcp", "udp"] {
            rules.push(NetworkRule::new(Filter, Output, &["-p", proto, "-s", ip, "--sport", port, "-j", "ACCEPT"]));
        }
        // queries from host-network clients
        for proto in ["tcp", "udp"] {
            rules.push(NetworkRule::new(Raw, Output, &["-p", proto, "-d", ip, "--dport", port, "-j", "NOTRACK"]));
        }
        rules.push(NetworkRule::new(Raw, Output, &["-p", "tcp", "-d", ip, "--dport", health, "-j", "NOTRACK"]));
        rules.push(NetworkRule::new(Raw, Output, &["-p", "tcp", "-s", ip, "--sport", health, "-j", "NOTRACK"]));
    }

    rules
}
