//! Configuration resolution for sonara-se
//!
//! Priority order: CLI flag → `SONARA_*` environment variable → TOML
//! config file → compiled default. `clap` handles the CLI and ENV tiers
//! for flags that have them; token-style settings resolve from ENV and
//! TOML only.

use clap::Parser;
use sonara_common::config::{env_override, TomlConfig};
use sonara_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default embedding dimension for this deployment.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

/// sonara-se: similarity engine microservice
#[derive(Debug, Parser)]
#[command(name = "sonara-se", version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind the HTTP listener to
    #[arg(long, env = "SONARA_HOST")]
    pub host: Option<String>,

    /// Port to bind the HTTP listener to
    #[arg(long, env = "SONARA_PORT")]
    pub port: Option<u16>,

    /// SQLite database file path
    #[arg(long, env = "SONARA_DATABASE_PATH")]
    pub database: Option<PathBuf>,

    /// Number of task pipeline workers
    #[arg(long, env = "SONARA_WORKER_COUNT")]
    pub workers: Option<usize>,
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub embedding_dim: usize,
    pub shared_audio_dir: PathBuf,
    /// Bearer token attached to outbound callbacks
    pub callback_token: String,
    /// Optional bearer token required on inbound API requests
    pub api_token: Option<String>,
    pub worker_count: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl ServiceConfig {
    /// Resolve the effective configuration from CLI, environment, and
    /// TOML layers.
    pub fn resolve(cli: &Cli, toml: &TomlConfig) -> Result<Self> {
        let host = cli
            .host
            .clone()
            .or_else(|| toml.host.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let port = cli.port.or(toml.port).unwrap_or(5830);

        let database_path = cli
            .database
            .clone()
            .or_else(|| toml.database_path.clone().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("sonara.db"));

        let embedding_dim = match env_override("SONARA_EMBEDDING_DIM") {
            Some(value) => value
                .parse()
                .map_err(|_| Error::Config(format!("invalid SONARA_EMBEDDING_DIM: {value}")))?,
            None => toml.embedding_dim.unwrap_or(DEFAULT_EMBEDDING_DIM),
        };
        if embedding_dim == 0 {
            return Err(Error::Config("embedding_dim must be positive".to_string()));
        }

        let shared_audio_dir = env_override("SONARA_SHARED_AUDIO_DIR")
            .map(PathBuf::from)
            .or_else(|| toml.shared_audio_dir.clone().map(PathBuf::from))
            .unwrap_or_else(|| std::env::temp_dir().join("sonara-audio"));

        let callback_token = env_override("SONARA_CALLBACK_TOKEN")
            .or_else(|| toml.callback_token.clone())
            .unwrap_or_default();
        if callback_token.is_empty() {
            warn!("No callback token configured; outbound callbacks will carry an empty bearer");
        }

        let api_token = env_override("SONARA_API_TOKEN").or_else(|| toml.api_token.clone());

        let worker_count = cli.workers.or(toml.worker_count).unwrap_or(2).max(1);

        let max_attempts = match env_override("SONARA_MAX_ATTEMPTS") {
            Some(value) => value
                .parse()
                .map_err(|_| Error::Config(format!("invalid SONARA_MAX_ATTEMPTS: {value}")))?,
            None => toml.max_attempts.unwrap_or(3),
        };
        if max_attempts == 0 {
            return Err(Error::Config("max_attempts must be positive".to_string()));
        }

        let retry_backoff_secs = match env_override("SONARA_RETRY_BACKOFF_SECS") {
            Some(value) => value.parse().map_err(|_| {
                Error::Config(format!("invalid SONARA_RETRY_BACKOFF_SECS: {value}"))
            })?,
            None => toml.retry_backoff_secs.unwrap_or(5),
        };

        Ok(Self {
            host,
            port,
            database_path,
            embedding_dim,
            shared_audio_dir,
            callback_token,
            api_token,
            worker_count,
            max_attempts,
            retry_backoff: Duration::from_secs(retry_backoff_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            database: None,
            workers: None,
        }
    }

    #[test]
    fn defaults_apply_when_nothing_configured() {
        let config = ServiceConfig::resolve(&bare_cli(), &TomlConfig::default()).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5830);
        assert_eq!(config.embedding_dim, DEFAULT_EMBEDDING_DIM);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn cli_overrides_toml() {
        let mut cli = bare_cli();
        cli.port = Some(9000);
        let toml = TomlConfig {
            port: Some(6000),
            embedding_dim: Some(8),
            ..TomlConfig::default()
        };
        let config = ServiceConfig::resolve(&cli, &toml).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.embedding_dim, 8);
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let toml = TomlConfig {
            embedding_dim: Some(0),
            ..TomlConfig::default()
        };
        assert!(ServiceConfig::resolve(&bare_cli(), &toml).is_err());
    }
}
