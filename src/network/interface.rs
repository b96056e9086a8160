//! Dummy interface backend built on iproute2.

use std::net::IpAddr;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use crate::network::backend::{InterfaceBackend, InterfaceError};

pub struct IpLinkBackend {
    binary: String,
}

impl IpLinkBackend {
    pub fn new() -> Self {
        Self {
            binary: "ip".to_string(),
        }
    }

    async fn ip(&self, args: &[&str]) -> std::io::Result<Output> {
        Command::new(&self.binary).args(args).output().await
    }
}

impl Default for IpLinkBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_missing_device(stderr: &str) -> bool {
    stderr.contains("does not exist") || stderr.contains("Cannot find device")
}

fn host_prefix(addr: &IpAddr) -> String {
    match addr {
        IpAddr::V4(_) => format!("{addr}/32"),
        IpAddr::V6(_) => format!("{addr}/128"),
    }
}

#[async_trait]
impl InterfaceBackend for IpLinkBackend {
    async fn ensure_dummy(&self, name: &str, addresses: &[IpAddr]) -> Result<bool, InterfaceError> {
        let check = |reason: String| InterfaceError::Check {
            name: name.to_string(),
            reason,
        };
        let add = |reason: String| InterfaceError::Add {
            name: name.to_string(),
            reason,
        };

        let shown = self
            .ip(&["link", "show", "dev", name])
            .await
            .map_err(|e| check(e.to_string()))?;
        let existed = if shown.status.success() {
            true
        } else if is_missing_device(&stderr_of(&shown)) {
            false
        } else {
            return Err(check(stderr_of(&shown)));
        };

        if !existed {
            let created = self
                .ip(&["link", "add", name, "type", "dummy"])
                .await
                .map_err(|e| add(e.to_string()))?;
            if !created.status.success() {
                return Err(add(stderr_of(&created)));
            }
        }

        // `replace` succeeds whether or not the address is already there.
        for addr in addresses {
            let prefix = host_prefix(addr);
            let assigned = self
                .ip(&["addr", "replace", &prefix, "dev", name])
                .await
                .map_err(|e| if existed { check(e.to_string()) } else { add(e.to_string()) })?;
            if !assigned.status.success() {
                let reason = stderr_of(&assigned);
                return Err(if existed { check(reason) } else { add(reason) });
            }
        }

        Ok(existed)
    }

    async fn remove_dummy(&self, name: &str) -> Result<(), InterfaceError> {
        let remove = |reason: String| InterfaceError::Remove {
            name: name.to_string(),
            reason,
        };

        let output = self
            .ip(&["link", "del", name])
            .await
            .map_err(|e| remove(e.to_string()))?;
        let stderr = stderr_of(&output);
        if output.status.success() || is_missing_device(&stderr) {
            Ok(())
        } else {
            Err(remove(stderr))
        }
    }
}
