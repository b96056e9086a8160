//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::{IpAddr, TcpListener};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use node_cache::config::DaemonSettings;
use node_cache::network::{InterfaceBackend, InterfaceError, NetworkRule, RuleBackend, RuleError};
use tempfile::TempDir;

pub const BUILTIN_TEMPLATE: &str = include_str!("../../templates/unbound.conf.j2");

/// Rule table kept in memory. Like iptables, it tolerates duplicates.
#[derive(Default)]
pub struct MemoryRuleBackend {
    rules: Mutex<Vec<NetworkRule>>,
    fail_with: Mutex<Option<String>>,
}

impl MemoryRuleBackend {
    /// Simulate another agent inserting the same rule again.
    pub fn insert_duplicate(&self, rule: &NetworkRule) {
        self.rules.lock().unwrap().insert(0, rule.clone());
    }

    pub fn count(&self, rule: &NetworkRule) -> usize {
        self.rules.lock().unwrap().iter().filter(|r| *r == rule).count()
    }

    pub fn len(&self) -> usize {
        self.rules.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every call fail with `stderr` until cleared with `None`.
    pub fn fail_with(&self, stderr: Option<&str>) {
        *self.fail_with.lock().unwrap() = stderr.map(str::to_string);
    }

    fn check_failure(&self) -> Result<(), RuleError> {
        match self.fail_with.lock().unwrap().as_deref() {
            Some(stderr) => Err(RuleError::from_output("iptables", "exit status: 4", stderr)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RuleBackend for MemoryRuleBackend {
    async fn ensure_rule(&self, rule: &NetworkRule) -> Result<bool, RuleError> {
        self.check_failure()?;
        let mut rules = self.rules.lock().unwrap();
        if rules.contains(rule) {
            return Ok(true);
        }
        rules.insert(0, rule.clone());
        Ok(false)
    }

    async fn delete_rule(&self, rule: &NetworkRule) -> Result<(), RuleError> {
        self.check_failure()?;
        let mut rules = self.rules.lock().unwrap();
        if let Some(pos) = rules.iter().position(|r| r == rule) {
            rules.remove(pos);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryInterfaceBackend {
    state: Mutex<Option<(String, Vec<IpAddr>)>>,
}

impl MemoryInterfaceBackend {
    pub fn current(&self) -> Option<(String, Vec<IpAddr>)> {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl InterfaceBackend for MemoryInterfaceBackend {
    async fn ensure_dummy(&self, name: &str, addresses: &[IpAddr]) -> Result<bool, InterfaceError> {
        let mut state = self.state.lock().unwrap();
        let existed = state.as_ref().is_some_and(|(current, _)| current == name);
        *state = Some((name.to_string(), addresses.to_vec()));
        Ok(existed)
    }

    async fn remove_dummy(&self, name: &str) -> Result<(), InterfaceError> {
        let mut state = self.state.lock().unwrap();
        if state.as_ref().is_some_and(|(current, _)| current == name) {
            *state = None;
        }
        Ok(())
    }
}

/// How the fake resolver behaves once launched.
#[derive(Debug, Clone, Copy)]
pub enum Resolver {
    /// Writes its pid file, logs each SIGHUP, exits after a minute.
    Running,
    /// Writes its pid file, then exits with status 1.
    Crashing,
    /// Never launched: checkconf rejects the configuration.
    Invalid,
}

/// Scratch directory with a fake resolver and settings pointing into it.
pub struct TestEnv {
    pub dir: TempDir,
    pub settings: DaemonSettings,
}

impl TestEnv {
    pub fn new(resolver: Resolver) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let pid_path = root.join("unbound.pid");
        let reload_log = root.join("reloads.log");

        let body = match resolver {
            Resolver::Running => format!(
                "echo $$ > {pid}\ntrap 'echo reload >> {log}' HUP\ni=0\nwhile [ $i -lt 60 ]; do sleep 1; i=$((i+1)); done\n",
                pid = pid_path.display(),
                log = reload_log.display(),
            ),
            Resolver::Crashing => format!("echo $$ > {}\nsleep 1\nexit 1\n", pid_path.display()),
            Resolver::Invalid => "exit 0\n".to_string(),
        };
        let checkconf = match resolver {
            Resolver::Invalid => "echo 'syntax error in unbound.conf' >&2\nexit 1\n",
            _ => "exit 0\n",
        };

        let mut settings = DaemonSettings::default();
        settings.resolver.exec = write_script(root, "unbound", &body);
        settings.resolver.checkconf_exec = write_script(root, "unbound-checkconf", checkconf);
        settings.resolver.pid_path = pid_path;
        settings.resolver.port = 5353;
        settings.resolver.template_path = root.join("unbound.conf.tmpl");
        settings.resolver.rendered_config_path = root.join("unbound.conf");
        settings.resolver.control_socket = root.join("unbound-control.sock");
        settings.sync.config_file = root.join("unbound.yaml");
        settings.sync.interval_secs = 1;
        settings.network.bind_addresses = vec!["169.254.25.10".parse().unwrap()];
        settings.health.port = free_port();
        settings.health.shutdown_grace_secs = 2;
        settings.observability.metrics_enabled = false;

        std::fs::write(&settings.resolver.template_path, BUILTIN_TEMPLATE).unwrap();
        std::fs::write(&settings.sync.config_file, "cache:\n  maxTTL: 60\n").unwrap();

        Self { dir, settings }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn rendered(&self) -> String {
        std::fs::read_to_string(&self.settings.resolver.rendered_config_path).unwrap_or_default()
    }

    pub fn reloads(&self) -> usize {
        std::fs::read_to_string(self.path("reloads.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Poll `condition` every 50ms for up to `timeout`.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
