//! Configuration file support for dumpling.
//!
//! Loads settings from `dumpling.toml` (or the file given with `-c`).
//! Missing sections and keys fall back to defaults; command-line flags
//! override file values.

use dumpling_core::TriageConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cli::CliError;

/// Config file looked up in the working directory when `-c` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "dumpling.toml";

/// Database file used when neither the config nor `-D` names one.
pub const DEFAULT_DATABASE: &str = "dumpling.redb";

/// Storage backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// redb embedded database (persistent).
    #[default]
    Redb,
    /// In-process maps, discarded on exit.
    Memory,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redb => f.write_str("redb"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backend to open.
    pub backend: Backend,
    /// Database file (redb backend only).
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: PathBuf::from(DEFAULT_DATABASE),
        }
    }
}

/// Complete application configuration.
///
/// ```toml
/// [store]
/// backend = "redb"
/// path = "/var/lib/dumpling/triage.redb"
///
/// [signature]
/// max_frames = 5
/// include_fault_type = true
///
/// [query]
/// window_days = 30
/// lookahead_days = 1
/// store_timeout_ms = 5000
/// json_cache_capacity = 4096
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    /// Engine settings (`[signature]` and `[query]`).
    #[serde(flatten)]
    pub triage: TriageConfig,
}

impl AppConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| CliError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the configuration for this run.
    ///
    /// An explicit path must exist. Without one, `dumpling.toml` in the
    /// working directory is used if present, defaults otherwise.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, CliError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    tracing::debug!("Loading config from {}", default_path.display());
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, database: Option<PathBuf>, backend: Option<Backend>) -> Self {
        if let Some(path) = database {
            self.store.path = path;
        }
        if let Some(backend) = backend {
            self.store.backend = backend;
        }
        self
    }
}
