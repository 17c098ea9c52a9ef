//! Client configuration.
//!
//! Configuration is read from the first TOML file found in:
//!
//! 1. an explicit path (`--config`)
//! 2. the `KRILL_CONFIG` environment variable
//! 3. `./.krill.toml`
//! 4. `~/.config/krill/client.toml`
//!
//! `KRILL_SOCKET`, when set, overrides the socket path from any source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::DEFAULT_SOCKET_PATH;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "KRILL_CONFIG";

/// Environment variable overriding the daemon socket path.
pub const SOCKET_ENV: &str = "KRILL_SOCKET";

/// Heartbeat client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service name to report as.
    pub service: Option<String>,
    /// Daemon socket path.
    pub socket_path: PathBuf,
    /// Heartbeat cadence for periodic reporting, in milliseconds.
    pub interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service: None,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            interval_ms: 1000,
        }
    }
}

impl ClientConfig {
    /// Heartbeat cadence as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Replaces the socket path when `value` is set and non-empty.
    pub fn apply_socket_override(&mut self, value: Option<String>) {
        if let Some(path) = value.filter(|v| !v.trim().is_empty()) {
            tracing::debug!(path = %path, "Socket path overridden by {SOCKET_ENV}");
            self.socket_path = PathBuf::from(path);
        }
    }
}

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader with the default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        if let Some(env_path) = std::env::var_os(CONFIG_ENV) {
            search_paths.push(PathBuf::from(env_path));
        }

        search_paths.push(PathBuf::from(".krill.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("krill").join("client.toml"));
        }

        Self { search_paths }
    }

    /// Creates a loader that only reads `path`.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Loads the first config file found, or defaults if none exists, then
    /// applies the `KRILL_SOCKET` override.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed,
    /// or if it sets `interval_ms` to zero.
    pub fn load(&self) -> Result<ClientConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading config file");
                Self::load_from_path(&path)?
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                ClientConfig::default()
            }
        };

        config.apply_socket_override(std::env::var(SOCKET_ENV).ok());
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<ClientConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let config: ClientConfig =
            toml::from_str(&content).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;

        if config.interval_ms == 0 {
            return Err(ConfigError::InvalidInterval {
                path: path.to_path_buf(),
            });
        }

        Ok(config)
    }

    /// Locations checked by [`load`](Self::load), in priority order.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Returns the first search path that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config file {}: interval_ms must be greater than zero", .path.display())]
    InvalidInterval { path: PathBuf },
}
