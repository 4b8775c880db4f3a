//! Pipeline configuration.
//!
//! Loaded from a JSON file into an explicit struct that is passed into
//! constructors. Behavior toggles (which storage backend, how many
//! workers) live here, not in process-wide mutable state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which storage backend the gateway resolves bytes through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Objects live under a local root directory (or a mounted network
    /// volume that presents as one).
    Filesystem { root: PathBuf },
    /// Objects live in process memory. Tests and dry-run deployments.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config format version. Only "1.0" is understood.
    pub version: String,

    pub storage: StorageConfig,

    /// Metadata database path. Defaults to `~/.siphon/data/siphon.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Worker thread count. Defaults to the number of CPUs.
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// Minutes after which an untouched `processing` record is considered
    /// abandoned by the stale sweep.
    #[serde(default)]
    pub stale_after_minutes: Option<u64>,
}

impl Config {
    pub fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn stale_after_minutes(&self) -> u64 {
        self.stale_after_minutes.unwrap_or(60)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if let StorageConfig::Filesystem { root } = &config.storage {
        if root.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "storage.root must not be empty".to_string(),
            });
        }
    }

    if config.worker_count == Some(0) {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.stale_after_minutes == Some(0) {
        return Err(ConfigError::Validation {
            message: "stale_after_minutes must be at least 1".to_string(),
        });
    }

    Ok(())
}
