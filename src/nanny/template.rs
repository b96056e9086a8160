//! Rendering of the Unbound configuration file.

use std::path::{Path, PathBuf};

use minijinja::{Environment, Value};
use thiserror::Error;

use crate::config::Configuration;

const BUILTIN_TEMPLATE: &str = include_str!("../../templates/unbound.conf.j2");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render template: {0}")]
    Render(#[from] minijinja::Error),
}

/// Template source plus the values the document does not carry.
#[derive(Debug, Clone)]
pub struct ResolverTemplate {
    source: String,
    control_socket: PathBuf,
    additional_files_dir: Option<PathBuf>,
}

impl ResolverTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            control_socket: PathBuf::new(),
            additional_files_dir: None,
        }
    }

    /// The template shipped with node-cache.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_TEMPLATE)
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(source))
    }

    pub fn with_control_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_socket = path.into();
        self
    }

    pub fn with_additional_files_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.additional_files_dir = dir;
        self
    }

    pub fn render(&self, config: &Configuration) -> Result<String, TemplateError> {
        let mut env = Environment::new();
        env.add_filter("yesno", yes_no);
        env.add_global(
            "control_socket",
            Value::from(self.control_socket.display().to_string()),
        );
        if let Some(dir) = &self.additional_files_dir {
            env.add_global("additional_files_dir", Value::from(dir.display().to_string()));
        }

        Ok(env.render_str(&self.source, config)?)
    }
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CacheConfig;

    fn render(config: &Configuration) -> String {
        ResolverTemplate::builtin()
            .with_control_socket("/var/run/unbound-control.sock")
            .render(config)
            .unwrap()
    }

    #[test]
    fn test_default_configuration_renders() {
        let mut config = Configuration::default();
        config.interfaces = vec!["169.254.25.10".parse().unwrap()];
        config.pid = "/var/run/unbound.pid".to_string();

        let out = render(&config);
        assert!(out.contains("interface: 169.254.25.10@53"));
        assert!(out.contains("pidfile: \"/var/run/unbound.pid\""));
        assert!(out.contains("num-threads: 1"));
        assert!(out.contains("control-interface: /var/run/unbound-control.sock"));
        assert!(!out.contains("forward-zone:"));
    }

    #[test]
    fn test_rate_limit_omitted_when_disabled() {
        let mut config = Configuration::default();
        assert!(!render(&config).contains("ratelimit:"));

        config.rate_limit = 1000;
        assert!(render(&config).contains("ratelimit: 1000"));
    }

    #[test]
    fn test_serve_expired_block() {
        let mut config = Configuration::default();
        let out = render(&config);
        assert!(out.contains("serve-expired: no"));
        assert!(!out.contains("serve-expired-ttl"));

        config.cache = CacheConfig {
            serve_expired: true,
            serve_expired_ttl: 86400,
            serve_expired_client_timeout: 1800,
            ..CacheConfig::default()
        };
        let out = render(&config);
        assert!(out.contains("serve-expired: yes"));
        assert!(out.contains("serve-expired-ttl: 86400"));
        assert!(out.contains("serve-expired-client-timeout: 1800"));
    }

    #[test]
    fn test_zones_and_includes() {
        let config: Configuration = serde_yaml::from_str(
            r#"
forwardZones:
  - name: "."
    servers: ["1.1.1.1", "8.8.8.8@53"]
    useTCP: true
stubZones:
  - name: cluster.local
    servers: ["10.96.0.10"]
"#,
        )
        .unwrap();
        let config = Configuration {
            additional_files: vec!["extra.conf".to_string()],
            ..config
        };

        let out = ResolverTemplate::builtin()
            .with_additional_files_dir(Some(PathBuf::from("/etc/unbound/conf.d")))
            .render(&config)
            .unwrap();
        assert!(out.contains("forward-addr: 8.8.8.8@53"));
        assert!(out.contains("forward-tcp-upstream: yes"));
        assert!(out.contains("name: \"cluster.local\""));
        assert!(out.contains("stub-tcp-upstream: no"));
        assert!(out.contains("include: \"/etc/unbound/conf.d/extra.conf\""));
    }

    #[test]
    fn test_load_missing_template() {
        let err = ResolverTemplate::load(Path::new("/nonexistent/unbound.conf.tmpl")).unwrap_err();
        assert!(matches!(err, TemplateError::Read { .. }));
    }
}
