//! `iptables`/`ip6tables` command backend.

use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use crate::network::backend::{RuleBackend, RuleError};
use crate::network::rules::NetworkRule;

/// Seconds iptables waits for the xtables lock before giving up.
const LOCK_WAIT_SECS: &str = "5";

/// `iptables -C` exit code for "no such rule".
const RULE_MISSING: i32 = 1;

pub struct IptablesBackend {
    binary: &'static str,
}

impl IptablesBackend {
    pub fn new(ipv6: bool) -> Self {
        Self {
            binary: if ipv6 { "ip6tables" } else { "iptables" },
        }
    }

    async fn run(&self, op: &str, rule: &NetworkRule) -> Result<Output, RuleError> {
        Command::new(self.binary)
            .args(["-w", LOCK_WAIT_SECS, "-t", rule.table.as_str(), op, rule.chain.as_str()])
            .args(&rule.args)
            .output()
            .await
            .map_err(|source| RuleError::Io {
                command: self.binary.to_string(),
                source,
            })
    }

    fn failure(&self, op: &str, output: &Output) -> RuleError {
        RuleError::from_output(
            format!("{} {op}", self.binary),
            output.status.to_string(),
            &String::from_utf8_lossy(&output.stderr),
        )
    }

    /// `Ok(true)` if the rule is present.
    async fn check(&self, rule: &NetworkRule) -> Result<bool, RuleError> {
        let output = self.run("-C", rule).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(RULE_MISSING) => Ok(false),
            _ => Err(self.failure("-C", &output)),
        }
    }
}

#[async_trait]
impl RuleBackend for IptablesBackend {
    async fn ensure_rule(&self, rule: &NetworkRule) -> Result<bool, RuleError> {
        if self.check(rule).await? {
            return Ok(true);
        }

        let output = self.run("-I", rule).await?;
        if output.status.success() {
            Ok(false)
        } else {
            Err(self.failure("-I", &output))
        }
    }

    async fn delete_rule(&self, rule: &NetworkRule) -> Result<(), RuleError> {
        if !self.check(rule).await? {
            return Ok(());
        }

        let output = self.run("-D", rule).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(self.failure("-D", &output))
        }
    }
}
