//! Service configuration file.
//!
//! Every section is optional; a missing file at the default location means
//! all defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use riskguard_core::{CheckConfig, RemoteSignalsConfig};
use serde::{Deserialize, Serialize};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/riskguard.json";

/// Listen address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: riskguard_server::DEFAULT_HOST.to_string(),
            port: riskguard_server::DEFAULT_PORT,
        }
    }
}

/// Where cached verdicts live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// No result cache.
    None,
    /// In-process map, lost on restart.
    #[default]
    Memory,
    /// SQLite file at `cache.path`.
    Sqlite,
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub backend: CacheBackendKind,
    pub path: PathBuf,
    /// Expired-entry purge interval in seconds (0 = never).
    pub purge_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            path: PathBuf::from("data/cache.db"),
            purge_interval_secs: 600,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// Daily-rotated log files go here when set.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub check: CheckConfig,
    pub remote: RemoteSignalsConfig,
    pub cache: CacheSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Reads a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Reads `path` if given, otherwise the default file if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}
