//! Seams to the host's packet filter and link configuration.
//!
//! Both are shared with other daemons on the node, so every operation is
//! idempotent and callers retry instead of assuming exclusive access.

use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;

use crate::network::rules::NetworkRule;

/// Message iptables prints when it cannot take its lock.
const XTABLES_LOCK_MESSAGE: &str = "holding the xtables lock";

#[derive(Debug, Error)]
pub enum RuleError {
    /// Another process held the xtables lock. Expected under contention.
    #[error("xtables lock contention: {0}")]
    Lock(String),

    #[error("{command} exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl RuleError {
    /// Classify a failed invocation by its stderr.
    pub fn from_output(command: impl Into<String>, status: impl Into<String>, stderr: &str) -> Self {
        let stderr = stderr.trim().to_string();
        if stderr.contains(XTABLES_LOCK_MESSAGE) {
            RuleError::Lock(stderr)
        } else {
            RuleError::Command {
                command: command.into(),
                status: status.into(),
                stderr,
            }
        }
    }

    pub fn is_lock(&self) -> bool {
        matches!(self, RuleError::Lock(_))
    }
}

#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("failed to add interface {name}: {reason}")]
    Add { name: String, reason: String },

    #[error("failed to check interface {name}: {reason}")]
    Check { name: String, reason: String },

    #[error("failed to remove interface {name}: {reason}")]
    Remove { name: String, reason: String },
}

/// Idempotent rule management.
#[async_trait]
pub trait RuleBackend: Send + Sync {
    /// Make sure `rule` exists, inserting it at the head of its chain if not.
    ///
    /// Returns `true` if the rule was already present.
    async fn ensure_rule(&self, rule: &NetworkRule) -> Result<bool, RuleError>;

    /// Delete one instance of `rule`. Absent rules are not an error.
    async fn delete_rule(&self, rule: &NetworkRule) -> Result<(), RuleError>;
}

/// Idempotent management of the local-only listen interface.
#[async_trait]
pub trait InterfaceBackend: Send + Sync {
    /// Make sure a dummy interface `name` exists and carries `addresses`.
    ///
    /// Returns `true` if the interface was already present.
    async fn ensure_dummy(&self, name: &str, addresses: &[IpAddr]) -> Result<bool, InterfaceError>;

    /// Remove the interface. A missing interface is not an error.
    async fn remove_dummy(&self, name: &str) -> Result<(), InterfaceError>;
}
