//! Configuration synchronization.
//!
//! Loads the YAML document plus any auxiliary files, fingerprints them and
//! decodes a [`Configuration`] whenever the fingerprint moves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::config::schema::Configuration;

/// Errors raised while loading the configuration sources.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("config path {0:?} is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("non-utf8 data in {0:?}")]
    NonUtf8(PathBuf),

    #[error("unable to parse configuration: {0}")]
    Decode(#[from] serde_yaml::Error),
}

/// Raw outcome of one load cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Hex SHA-256 of the hashed inputs, empty when there was nothing to hash.
    pub version: String,
    pub additional_files: Vec<String>,
    pub config_data: String,
}

/// Watches the configuration document and its auxiliary directory.
pub struct ConfigSync {
    config_file: PathBuf,
    additional_dir: Option<PathBuf>,
    period: Duration,
    latest_version: String,
}

impl ConfigSync {
    pub fn new(config_file: impl Into<PathBuf>, additional_dir: Option<PathBuf>, period: Duration) -> Self {
        Self {
            config_file: config_file.into(),
            additional_dir,
            period,
            latest_version: String::new(),
        }
    }

    /// Last fingerprint that was accepted.
    pub fn version(&self) -> &str {
        &self.latest_version
    }

    /// Run a single load cycle.
    ///
    /// Always yields a usable configuration. The error, if any, says why
    /// defaults were substituted.
    pub async fn load_once(&mut self) -> (Configuration, Option<SyncError>) {
        match self.load().await {
            Ok(result) => {
                self.observe(&result.version);
                decode(result)
            }
            Err(e) => (Configuration::default(), Some(e)),
        }
    }

    /// Poll for changes on a fixed interval.
    ///
    /// The first poll happens immediately. Only fingerprint changes are
    /// emitted; the task waits on `send` so a slow consumer slows polling
    /// down instead of losing updates. The task ends when the receiver is
    /// dropped.
    pub fn start_periodic(mut self) -> mpsc::Receiver<Configuration> {
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut ticker = time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let result = match self.load().await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(path = %self.config_file.display(), error = %e, "Error loading config");
                        continue;
                    }
                };

                if !self.observe(&result.version) {
                    continue;
                }

                let (config, err) = decode(result);
                if let Some(e) = err {
                    tracing::warn!(error = %e, "Continuing with default configuration");
                }

                if tx.send(config).await.is_err() {
                    tracing::debug!("Config receiver dropped, stopping sync");
                    return;
                }
            }
        });

        rx
    }

    /// Record `version` and report whether it differs from the previous one.
    fn observe(&mut self, version: &str) -> bool {
        if version == self.latest_version {
            tracing::trace!(version = %version, "Config unchanged");
            return false;
        }

        tracing::debug!(
            version = %version,
            previous = %self.latest_version,
            "Updating config version"
        );
        self.latest_version = version.to_string();
        true
    }

    async fn load(&self) -> Result<SyncResult, SyncError> {
        let mut hasher = Sha256::new();
        let mut files = Vec::new();

        if let Some(dir) = &self.additional_dir {
            for (name, data) in read_additional_files(dir).await? {
                hasher.update(name.as_bytes());
                hasher.update([0u8]);
                hasher.update(data.as_bytes());
                hasher.update([0u8]);
                files.push(name);
            }
        }

        let config_data = match tokio::fs::read(&self.config_file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %self.config_file.display(), error = %e, "Cannot load configuration file");
                Vec::new()
            }
        };
        let config_data =
            String::from_utf8(config_data).map_err(|_| SyncError::NonUtf8(self.config_file.clone()))?;

        hasher.update(self.config_file.as_os_str().as_encoded_bytes());
        hasher.update([0u8]);
        hasher.update(config_data.as_bytes());
        hasher.update([0u8]);

        let version = if config_data.is_empty() && files.is_empty() {
            String::new()
        } else {
            hex::encode(hasher.finalize())
        };

        Ok(SyncResult {
            version,
            additional_files: files,
            config_data,
        })
    }
}

/// Read the flat, non-hidden files of `dir`, sorted by name.
async fn read_additional_files(dir: &Path) -> Result<Vec<(String, String)>, SyncError> {
    let read_err = |source| SyncError::Read {
        path: dir.to_path_buf(),
        source,
    };

    let meta = tokio::fs::metadata(dir).await.map_err(read_err)?;
    if !meta.is_dir() {
        return Err(SyncError::NotADirectory(dir.to_path_buf()));
    }

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        paths.push(entry.path());
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let meta = tokio::fs::metadata(&path).await.map_err(|source| SyncError::Read {
            path: path.clone(),
            source,
        })?;
        // no recursion
        if meta.is_dir() {
            continue;
        }

        let bytes = tokio::fs::read(&path).await.map_err(|source| SyncError::Read {
            path: path.clone(),
            source,
        })?;
        let data = String::from_utf8(bytes).map_err(|_| SyncError::NonUtf8(path.clone()))?;
        files.push((name, data));
    }

    Ok(files)
}

/// Turn a load result into a configuration, falling back to defaults.
fn decode(result: SyncResult) -> (Configuration, Option<SyncError>) {
    let SyncResult {
        version,
        additional_files,
        config_data,
    } = result;

    if config_data.trim().is_empty() {
        tracing::debug!(version = %version, "Empty configuration document, using defaults");
        let config = Configuration {
            additional_files,
            ..Configuration::default()
        };
        return (config, None);
    }

    match serde_yaml::from_str::<Configuration>(&config_data) {
        Ok(mut config) => {
            config.additional_files = additional_files;
            (config, None)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Unable to parse configuration, continuing with default");
            let config = Configuration {
                additional_files,
                ..Configuration::default()
            };
            (config, Some(SyncError::Decode(e)))
        }
    }
}
