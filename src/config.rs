//! Configuration management for claude-accounts.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `5111`.
//! - `CLAUDE_ACCOUNTS_DIR` - Optional. Vault directory. Defaults to `~/.claude-accounts`.
//! - `CLAUDE_CLI_PATH` - Optional. Path to the `claude` binary. Defaults to `claude`.
//! - `CLAUDE_CREDENTIALS_PATH` - Optional. The CLI's own credential file.
//!   Defaults to `~/.claude/.credentials.json`.
//! - `LOGIN_POLL_INTERVAL_MS` - Optional. Login watcher poll interval. Defaults to `2000`.
//! - `LOGIN_SETTLE_DELAY_MS` - Optional. Delay after a detected change before
//!   reading the credential file. Defaults to `500`.
//! - `REFRESH_TIMEOUT_SECS` - Optional. OAuth refresh request timeout. Defaults to `30`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::util::home_dir;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Server and vault configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Directory holding the vault database and encryption key
    pub vault_dir: PathBuf,

    /// Path to the external CLI binary
    pub cli_path: String,

    /// The CLI's own credential file, read on capture and kept in sync on refresh
    pub credentials_path: PathBuf,

    /// Login watcher poll interval
    pub login_poll_interval: Duration,

    /// Settle delay after the credential file changes before reading it
    pub login_settle_delay: Duration,

    /// OAuth refresh request timeout
    pub refresh_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "5111".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let vault_dir = std::env::var("CLAUDE_ACCOUNTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home_dir()).join(".claude-accounts"));

        let cli_path = std::env::var("CLAUDE_CLI_PATH").unwrap_or_else(|_| "claude".to_string());

        let credentials_path = std::env::var("CLAUDE_CREDENTIALS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                PathBuf::from(home_dir())
                    .join(".claude")
                    .join(".credentials.json")
            });

        let login_poll_interval = Duration::from_millis(parse_ms("LOGIN_POLL_INTERVAL_MS", 2000)?);
        let login_settle_delay = Duration::from_millis(parse_ms("LOGIN_SETTLE_DELAY_MS", 500)?);

        let refresh_timeout = Duration::from_secs(parse_ms("REFRESH_TIMEOUT_SECS", 30)?);

        Ok(Self {
            host,
            port,
            vault_dir,
            cli_path,
            credentials_path,
            login_poll_interval,
            login_settle_delay,
            refresh_timeout,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(vault_dir: PathBuf, credentials_path: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5111,
            vault_dir,
            cli_path: "claude".to_string(),
            credentials_path,
            login_poll_interval: Duration::from_millis(2000),
            login_settle_delay: Duration::from_millis(500),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

fn parse_ms(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}
