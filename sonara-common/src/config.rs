//! Configuration loading
//!
//! Sonara services resolve settings with the priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`SONARA_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! This module owns the TOML layer and the file location rules; each
//! service applies its own CLI/ENV overrides on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// On-disk TOML configuration. Every field is optional; absent fields fall
/// through to ENV and then to compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Host to bind the HTTP listener to
    pub host: Option<String>,
    /// Port to bind the HTTP listener to
    pub port: Option<u16>,
    /// SQLite database file path
    pub database_path: Option<String>,
    /// Fixed embedding dimension for this deployment
    pub embedding_dim: Option<usize>,
    /// Directory shared with upload handling for audio temp files
    pub shared_audio_dir: Option<String>,
    /// Bearer token attached to outbound callbacks
    pub callback_token: Option<String>,
    /// Optional bearer token required on inbound API requests
    pub api_token: Option<String>,
    /// Number of task pipeline workers
    pub worker_count: Option<usize>,
    /// Maximum attempts per pipeline stage before terminal failure
    pub max_attempts: Option<u32>,
    /// Base backoff in seconds between stage retries
    pub retry_backoff_secs: Option<u64>,
}

impl TomlConfig {
    /// Load configuration from an explicit path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Load configuration from the default location, if a file exists
    /// there. Missing file is not an error.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Default configuration file path for the platform
/// (`~/.config/sonara/sonara-se.toml` on Linux, the platform equivalent
/// elsewhere).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sonara").join("sonara-se.toml"))
}

/// Read an environment variable override, treating empty values as unset.
pub fn env_override(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 5830\nembedding_dim = 512").unwrap();

        let config = TomlConfig::load(file.path()).unwrap();
        assert_eq!(config.port, Some(5830));
        assert_eq!(config.embedding_dim, Some(512));
        assert!(config.host.is_none());
        assert!(config.callback_token.is_none());
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number").unwrap();
        assert!(TomlConfig::load(file.path()).is_err());
    }
}
