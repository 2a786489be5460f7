use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// =============================================================================
// Registry-wide names
// =============================================================================

/// Package name of the host application plugins are indexed against
pub const DEFAULT_HOST_PACKAGE: &str = "craftcms/cms";

/// Composer package type that marks a plugin
pub const PLUGIN_PACKAGE_TYPE: &str = "craft-plugin";

/// Synthetic package Composer uses for the project being installed
pub const ROOT_PACKAGE_NAME: &str = "__root__";

/// Namespaces of asset pseudo-packages that are never tracked
pub const PSEUDO_PACKAGE_PREFIXES: &[&str] = &["bower-asset/", "npm-asset/"];

// =============================================================================
// Gate and network constants
// =============================================================================

/// Name of the process-wide sync gate
pub const DEFAULT_LOCK_NAME: &str = "package-manager";

/// Bounded wait when acquiring the sync gate (seconds)
pub const DEFAULT_LOCK_WAIT_SECS: u64 = 10;

/// Timeout for a single VCS request in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

pub const DEFAULT_PACKAGIST_URL: &str = "https://repo.packagist.org";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Registry configuration structure
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    pub host_package: String,
    pub plugin_type: String,
    pub lock: LockConfig,
    pub compat: CompatConfig,
    pub vcs: VcsConfig,
    pub database_path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host_package: DEFAULT_HOST_PACKAGE.to_string(),
            plugin_type: PLUGIN_PACKAGE_TYPE.to_string(),
            lock: LockConfig::default(),
            compat: CompatConfig::default(),
            vcs: VcsConfig::default(),
            database_path: None,
        }
    }
}

impl RegistryConfig {
    /// Load from a JSON file, or fall back to defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(db_path)
    }
}

/// Sync gate configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LockConfig {
    pub name: String,
    pub wait_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOCK_NAME.to_string(),
            wait_secs: DEFAULT_LOCK_WAIT_SECS,
        }
    }
}

/// Compatibility index configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CompatConfig {
    /// Stop walking a plugin's releases at the first miss after a hit
    pub short_circuit: bool,
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            short_circuit: true,
        }
    }
}

/// VCS access configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct VcsConfig {
    /// Refuse to sync plugins when no access token is configured
    pub require_token: bool,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub packagist_url: String,
    /// Push endpoint registered on managed repositories; no webhook when unset
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            require_token: false,
            github_token: None,
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            packagist_url: DEFAULT_PACKAGIST_URL.to_string(),
            webhook_url: None,
            webhook_secret: None,
        }
    }
}

/// Returns the path to the data directory for plugin-registry.
/// Uses $XDG_DATA_HOME/plugin-registry if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/plugin-registry,
/// or ./plugin-registry if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the database file.
pub fn db_path() -> PathBuf {
    data_dir().join("registry.db")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("plugin-registry.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("plugin-registry")
}
