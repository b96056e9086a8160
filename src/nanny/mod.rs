//! Resolver process supervision.
//!
//! # Lifecycle
//! ```text
//! configure(config) → render template → <path>.tmp → rename over <path>
//! start()           → checkconf <path> → unbound -d -c <path>
//! reload()          → SIGHUP to the running pid
//! take_exit()       → one-shot exit notification for the orchestrator
//! ```
//!
//! The resolver is never respawned. Its exit ends the daemon.

pub mod process;
pub mod template;

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::config::schema::{Configuration, DEFAULT_PORT};
use crate::health::{HealthCheck, HealthError};
use crate::observability::metrics::{self, SetupError};
use crate::util::is_file_present;

pub use process::{ExitOutcome, SupervisedProcess};
pub use template::{ResolverTemplate, TemplateError};

#[derive(Debug, Error)]
pub enum NannyError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration cannot be validated: {status}: {stderr}")]
    Validation { status: String, stderr: String },

    #[error("failed to launch {exec}: {source}")]
    Spawn {
        exec: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resolver is not running")]
    NotRunning,

    #[error("failed to signal resolver: {0}")]
    Signal(std::io::Error),
}

#[derive(Debug, Clone)]
pub struct NannyOptions {
    pub exec: PathBuf,
    pub checkconf_exec: PathBuf,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub pid_path: PathBuf,
    pub config_path: PathBuf,
}

pub struct Nanny {
    opts: NannyOptions,
    template: ResolverTemplate,
    pid: Option<u32>,
    exit: Option<oneshot::Receiver<ExitOutcome>>,
}

impl Nanny {
    pub fn new(opts: NannyOptions, template: ResolverTemplate) -> Self {
        Self {
            opts,
            template,
            pid: None,
            exit: None,
        }
    }

    pub fn set_template(&mut self, template: ResolverTemplate) {
        self.template = template;
    }

    /// Fill in the runtime fields and write the rendered file.
    ///
    /// On failure the previously written file is left in place.
    pub fn configure(&self, mut config: Configuration) -> Result<(), NannyError> {
        config.port = match self.opts.port {
            0 | u16::MAX => DEFAULT_PORT,
            port => port,
        };
        config.interfaces = self.opts.addresses.clone();
        config.pid = self.opts.pid_path.display().to_string();

        let result = self.write_config(&config);
        if let Err(e) = &result {
            tracing::error!(path = %self.opts.config_path.display(), error = %e, "Unable to write Unbound configuration");
            metrics::publish_error(SetupError::Config);
        }
        result
    }

    fn write_config(&self, config: &Configuration) -> Result<(), NannyError> {
        let rendered = self.template.render(config)?;

        let path = &self.opts.config_path;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write_err = |source| NannyError::Write {
            path: path.clone(),
            source,
        };
        std::fs::write(&tmp, rendered).map_err(write_err)?;
        if let Err(source) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(write_err(source));
        }

        tracing::debug!(path = %path.display(), "Wrote Unbound configuration");
        Ok(())
    }

    /// Validate the rendered file and launch the resolver.
    pub async fn start(&mut self) -> Result<(), NannyError> {
        self.validate().await?;
        tracing::debug!("Configuration is validated");

        let config_path = self.opts.config_path.display().to_string();
        let process = SupervisedProcess::spawn(&self.opts.exec, &["-d", "-c", &config_path])
            .map_err(|source| NannyError::Spawn {
                exec: self.opts.exec.clone(),
                source,
            })?;

        tracing::info!(pid = process.pid, exec = %self.opts.exec.display(), "Started Unbound");
        self.pid = Some(process.pid);
        self.exit = Some(process.exit);
        Ok(())
    }

    async fn validate(&self) -> Result<(), NannyError> {
        tracing::debug!("Validating configuration");
        let output = Command::new(&self.opts.checkconf_exec)
            .arg(&self.opts.config_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| NannyError::Spawn {
                exec: self.opts.checkconf_exec.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::warn!(status = %output.status, stderr = %stderr, "Configuration cannot be validated");
        Err(NannyError::Validation {
            status: output.status.to_string(),
            stderr,
        })
    }

    /// Ask the resolver to re-read its configuration.
    pub fn reload(&self) -> Result<(), NannyError> {
        let Some(pid) = self.pid else {
            tracing::error!("Unable to reload Unbound: not started");
            return Err(NannyError::NotRunning);
        };
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return Err(NannyError::NotRunning);
        };

        tracing::debug!(pid, "Reloading Unbound");
        // SAFETY: kill(2) takes plain integers and touches no memory we own.
        let rc = unsafe { libc::kill(pid, libc::SIGHUP) };
        if rc != 0 {
            let e = std::io::Error::last_os_error();
            tracing::error!(pid, error = %e, "Unable to reload Unbound");
            return Err(NannyError::Signal(e));
        }
        Ok(())
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Hand over the exit notification. Yields `Some` once per start.
    pub fn take_exit(&mut self) -> Option<oneshot::Receiver<ExitOutcome>> {
        self.exit.take()
    }

    pub fn health_probe(&self) -> PidFileCheck {
        PidFileCheck {
            path: self.opts.pid_path.clone(),
        }
    }
}

/// Healthy while the resolver's pid file exists.
#[derive(Debug, Clone)]
pub struct PidFileCheck {
    path: PathBuf,
}

impl PidFileCheck {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl HealthCheck for PidFileCheck {
    fn health_check(&self) -> Result<(), HealthError> {
        if is_file_present(&self.path) {
            Ok(())
        } else {
            Err(HealthError::new("pid file for unbound is not found"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &Path) -> NannyOptions {
        NannyOptions {
            exec: PathBuf::from("/bin/false"),
            checkconf_exec: PathBuf::from("/bin/false"),
            addresses: vec!["169.254.25.10".parse().unwrap()],
            port: 0,
            pid_path: dir.join("unbound.pid"),
            config_path: dir.join("unbound.conf"),
        }
    }

    #[test]
    fn test_configure_injects_runtime_fields() {
        let dir = tempfile::tempdir().unwrap();
        let nanny = Nanny::new(options(dir.path()), ResolverTemplate::builtin());

        nanny.configure(Configuration::default()).unwrap();

        let rendered = std::fs::read_to_string(dir.path().join("unbound.conf")).unwrap();
        assert!(rendered.contains("interface: 169.254.25.10@53"));
        assert!(rendered.contains(&format!("pidfile: \"{}\"", dir.path().join("unbound.pid").display())));
        assert!(!dir.path().join("unbound.conf.tmp").exists());
    }

    #[test]
    fn test_failed_render_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut nanny = Nanny::new(options(dir.path()), ResolverTemplate::builtin());
        nanny.configure(Configuration::default()).unwrap();
        let before = std::fs::read_to_string(dir.path().join("unbound.conf")).unwrap();

        nanny.set_template(ResolverTemplate::new("{% if %}"));
        assert!(matches!(
            nanny.configure(Configuration::default()),
            Err(NannyError::Template(_))
        ));

        let after = std::fs::read_to_string(dir.path().join("unbound.conf")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("unbound.conf");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("occupied"), "").unwrap();

        let nanny = Nanny::new(options(dir.path()), ResolverTemplate::builtin());
        assert!(matches!(
            nanny.configure(Configuration::default()),
            Err(NannyError::Write { .. })
        ));
        assert!(!dir.path().join("unbound.conf.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_validation_does_not_launch() {
        let dir = tempfile::tempdir().unwrap();
        let mut nanny = Nanny::new(options(dir.path()), ResolverTemplate::builtin());
        nanny.configure(Configuration::default()).unwrap();

        let err = nanny.start().await.unwrap_err();
        assert!(matches!(err, NannyError::Validation { .. }));
        assert!(nanny.pid().is_none());
        assert!(nanny.take_exit().is_none());
    }

    #[test]
    fn test_reload_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let nanny = Nanny::new(options(dir.path()), ResolverTemplate::builtin());
        assert!(matches!(nanny.reload(), Err(NannyError::NotRunning)));
    }

    #[test]
    fn test_pid_file_check() {
        let dir = tempfile::tempdir().unwrap();
        let check = PidFileCheck::new(dir.path().join("unbound.pid"));
        assert_eq!(
            check.health_check().unwrap_err().to_string(),
            "pid file for unbound is not found"
        );

        std::fs::write(dir.path().join("unbound.pid"), "1").unwrap();
        assert!(check.health_check().is_ok());
    }
}
