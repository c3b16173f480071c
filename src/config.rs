use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use pairledger_core::SchemaDescriptor;

use crate::balancing::BalancingConfig;
use crate::coordinator::RetryPolicy;
use crate::finder::{FindOrCreateStrategy, DEFAULT_MAX_ATTEMPTS};

#[derive(Parser, Debug)]
#[command(name = "pairledger", about = "PairLedger - atomic double-entry pair persistence")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "pairledger.toml")]
    pub config: PathBuf,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// SQLite path or Postgres connection string (overrides config file)
    #[arg(short, long)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Commit a one-pair batch moving `amount` from the credit to the debit account
    Post {
        debit: String,
        credit: String,
        amount: Decimal,
        #[arg(short = 'm', long, default_value = "")]
        description: String,
    },
    /// Read a ledger entry and its pair
    Entry { id: i64 },
    /// Find or create an account
    Account { key: String },
    /// Ledger row count
    Stats,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub schema: SchemaDescriptor,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    #[serde(default = "default_path")]
    pub path: PathBuf,

    #[serde(default = "default_url")]
    pub url: String,

    /// How long a statement waits on a lock before failing with a conflict.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default)]
    pub balancing: BalancingConfig,

    #[serde(default)]
    pub find_or_create: FindOrCreateStrategy,

    #[serde(default = "default_find_or_create_attempts")]
    pub find_or_create_attempts: u32,

    #[serde(default = "default_commit_attempts")]
    pub commit_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

fn default_path() -> PathBuf {
    PathBuf::from("pairledger.db")
}

fn default_url() -> String {
    "host=localhost user=postgres".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Upper bound for `retry_backoff_ms`.
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

fn default_find_or_create_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_commit_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    25
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: default_backend(),
            path: default_path(),
            url: default_url(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            balancing: BalancingConfig::default(),
            find_or_create: FindOrCreateStrategy::default(),
            find_or_create_attempts: default_find_or_create_attempts(),
            commit_attempts: default_commit_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl LedgerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.commit_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl Config {
    /// Reads the config file, falling back to defaults when it does not
    /// exist, then applies CLI overrides.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Config::parse(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: cli.config.clone(),
                    source,
                })
            }
        };

        // CLI overrides
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref database) = cli.database {
            match config.storage.backend {
                BackendKind::Postgres => config.storage.url = database.clone(),
                _ => config.storage.path = PathBuf::from(database),
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schema.validate().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.ledger.find_or_create_attempts == 0 {
            return Err(ConfigError::Invalid("find_or_create_attempts must be at least 1".to_string()));
        }
        if self.ledger.commit_attempts == 0 {
            return Err(ConfigError::Invalid("commit_attempts must be at least 1".to_string()));
        }
        if self.ledger.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(ConfigError::Invalid(format!(
                "retry_backoff_ms must not exceed {}",
                MAX_RETRY_BACKOFF_MS
            )));
        }
        Ok(())
    }
}
