//! Configuration management for data-explorer.
//!
//! Handles loading configuration from TOML or YAML files: the HTTP listener,
//! the state database location and the ordered list of named database
//! connections.

use crate::error::{ExplorerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use url::Url;

/// Main configuration structure for data-explorer.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Named database connections, in file order.
    #[serde(default)]
    pub connections: Vec<ConnectionDescriptor>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the API listens on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path of the SQLite state database.
    #[serde(default = "default_state_db_path")]
    pub state_db: PathBuf,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

/// Returns the default state database path for the current platform.
pub fn default_state_db_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("data-explorer")
        .join("state.db")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            state_db: default_state_db_path(),
        }
    }
}

/// A named database connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Identifier callers use to pick this connection.
    pub id: String,

    /// Driver connection string; the prefix selects the backend.
    pub dsn: String,
}

impl ConnectionDescriptor {
    pub fn new(id: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dsn: dsn.into(),
        }
    }
}

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Yaml,
}

impl Format {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::Yaml,
            _ => Self::Toml,
        }
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("data-explorer")
            .join("config.toml")
    }

    /// Loads configuration from a file. `.yaml` and `.yml` files are read as
    /// YAML, everything else as TOML.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExplorerError::config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config = match Format::from_path(path) {
            Format::Toml => Self::parse_toml(&content, path)?,
            Format::Yaml => Self::parse_yaml(&content, path)?,
        };
        config.validate();
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ExplorerError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Parses configuration from a YAML string.
    fn parse_yaml(content: &str, path: &Path) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            ExplorerError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Logs a warning for every connection id that appears more than once
    /// and returns the duplicated ids. Lookups use the first occurrence.
    pub fn validate(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();

        for conn in &self.connections {
            if !seen.insert(conn.id.as_str()) {
                warn!(
                    "Connection id '{}' is defined more than once; using the first definition",
                    conn.id
                );
                duplicates.push(conn.id.clone());
            }
        }

        duplicates
    }

    /// Gets a connection by id. First match wins.
    pub fn get_connection(&self, id: &str) -> Option<&ConnectionDescriptor> {
        self.connections.iter().find(|c| c.id == id)
    }
}

/// Returns `dsn` with any password replaced by `***`, for logging.
///
/// Handles URL-shaped DSNs as well as the `user:pass@tcp(host)/db` form.
pub fn redact_dsn(dsn: &str) -> String {
    if let Ok(mut url) = Url::parse(dsn) {
        if url.has_host() {
            if url.password().is_none() {
                return dsn.to_string();
            }
            if url.set_password(Some("***")).is_ok() {
                return url.to_string();
            }
        }
    }

    // user:pass@rest, with or without a scheme
    let (scheme, rest) = match dsn.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, dsn),
    };
    let redacted = match rest.rsplit_once('@') {
        Some((credentials, host)) => match credentials.split_once(':') {
            Some((user, _)) => format!("{user}:***@{host}"),
            None => rest.to_string(),
        },
        None => rest.to_string(),
    };

    match scheme {
        Some(scheme) => format!("{scheme}://{redacted}"),
        None => redacted,
    }
}
