//! # Server Configuration
//!
//! Settings are layered, lowest precedence first:
//!
//! 1.  Built-in defaults.
//! 2.  A JSON config file (`<app_name>.conf`, or `--config-path`).
//! 3.  Environment variables (a `.env` file is loaded first, if present).
//! 4.  Command-line arguments.
//!
//! Layers 3 and 4 are both handled by `clap`; every field is optional so that an
//! unset flag never masks a value from a lower layer.

use anyhow::{Context, Result};
use clap::Parser;
use lib_common::core::drain_worker::DrainConfig;
use lib_common::core::rate_limiter::ThrottleConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_DB_POOL_SIZE: usize = 16;
const DEFAULT_THROTTLE_WINDOW_MS: u64 = 1000;
const DEFAULT_THROTTLE_LIMIT: u32 = 5;
const DEFAULT_DISPATCH_DEADLINE_MS: u64 = 200;
const DEFAULT_DRAIN_BATCH_SIZE: usize = 100;
const DEFAULT_DRAIN_BACKOFF_MS: u64 = 100;
const DEFAULT_DRAIN_WORKERS: usize = 1;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "Actor position ingestion services", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SERVER_PORT", help = "Port to listen on.")]
    pub port: Option<u16>,

    #[clap(long, env = "CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LOG_LEVEL", help = "Log filter (trace, debug, info, warn, error, or a full directive).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL URL. Without it, queue and storage live in memory.")]
    pub database_url: Option<String>,

    #[clap(long, env = "DB_POOL_SIZE", help = "Maximum pooled database connections.")]
    pub db_pool_size: Option<usize>,

    #[clap(long, env = "HUB_URL", help = "WebSocket URL of a remote relay hub. Without it, the hub is embedded.")]
    pub hub_url: Option<String>,

    #[clap(long, env = "THROTTLE_WINDOW_MS", help = "Admission window length in milliseconds.")]
    pub throttle_window_ms: Option<u64>,

    #[clap(long, env = "THROTTLE_LIMIT", help = "Uploads allowed per actor per window.")]
    pub throttle_limit: Option<u32>,

    #[clap(long, env = "DISPATCH_DEADLINE_MS", help = "Deadline for queueing and broadcasting one reading.")]
    pub dispatch_deadline_ms: Option<u64>,

    #[clap(long, env = "DRAIN_BATCH_SIZE", help = "Entries popped per drain cycle.")]
    pub drain_batch_size: Option<usize>,

    #[clap(long, env = "DRAIN_BACKOFF_MS", help = "Pause after an empty or failed drain cycle.")]
    pub drain_backoff_ms: Option<u64>,

    #[clap(long, env = "DRAIN_WORKERS", help = "Number of concurrent drain workers.")]
    pub drain_workers: Option<usize>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    /// Built-in defaults for a server listening on `port`.
    pub fn defaults(port: u16) -> Config {
        Config {
            port: Some(port),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some(DEFAULT_LOG_LEVEL.to_string()),
            db_pool_size: Some(DEFAULT_DB_POOL_SIZE),
            throttle_window_ms: Some(DEFAULT_THROTTLE_WINDOW_MS),
            throttle_limit: Some(DEFAULT_THROTTLE_LIMIT),
            dispatch_deadline_ms: Some(DEFAULT_DISPATCH_DEADLINE_MS),
            drain_batch_size: Some(DEFAULT_DRAIN_BATCH_SIZE),
            drain_backoff_ms: Some(DEFAULT_DRAIN_BACKOFF_MS),
            drain_workers: Some(DEFAULT_DRAIN_WORKERS),
            ..Default::default()
        }
    }

    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            database_url: other.database_url.or(self.database_url),
            db_pool_size: other.db_pool_size.or(self.db_pool_size),
            hub_url: other.hub_url.or(self.hub_url),
            throttle_window_ms: other.throttle_window_ms.or(self.throttle_window_ms),
            throttle_limit: other.throttle_limit.or(self.throttle_limit),
            dispatch_deadline_ms: other.dispatch_deadline_ms.or(self.dispatch_deadline_ms),
            drain_batch_size: other.drain_batch_size.or(self.drain_batch_size),
            drain_backoff_ms: other.drain_backoff_ms.or(self.drain_backoff_ms),
            drain_workers: other.drain_workers.or(self.drain_workers),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn into_settings(self) -> Settings {
        let tls = match (self.tls_cert_path, self.tls_key_path) {
            (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
            _ => None,
        };

        Settings {
            port: self.port.unwrap_or_default(),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            database_url: self.database_url.filter(|url| !url.trim().is_empty()),
            db_pool_size: self.db_pool_size.unwrap_or(DEFAULT_DB_POOL_SIZE).max(1),
            hub_url: self.hub_url.filter(|url| !url.trim().is_empty()),
            throttle: ThrottleConfig {
                window: Duration::from_millis(self.throttle_window_ms.unwrap_or(DEFAULT_THROTTLE_WINDOW_MS)),
                limit: self.throttle_limit.unwrap_or(DEFAULT_THROTTLE_LIMIT),
            },
            dispatch_deadline: Duration::from_millis(
                self.dispatch_deadline_ms.unwrap_or(DEFAULT_DISPATCH_DEADLINE_MS),
            ),
            drain: DrainConfig {
                batch_size: self.drain_batch_size.unwrap_or(DEFAULT_DRAIN_BATCH_SIZE).max(1),
                empty_backoff: Duration::from_millis(self.drain_backoff_ms.unwrap_or(DEFAULT_DRAIN_BACKOFF_MS)),
            },
            drain_workers: self.drain_workers.unwrap_or(DEFAULT_DRAIN_WORKERS),
            tls,
        }
    }
}

/// Certificate and key, both PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_pool_size: usize,
    pub hub_url: Option<String>,
    pub throttle: ThrottleConfig,
    pub dispatch_deadline: Duration,
    pub drain: DrainConfig,
    pub drain_workers: usize,
    pub tls: Option<TlsPaths>,
}

/// Reads a JSON config file. A missing file is not an error.
pub fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some(config))
}

/// Layers defaults, an optional file and the command line into settings.
pub fn build_settings(defaults: Config, file: Option<Config>, cli: Config) -> Settings {
    let mut merged = defaults;
    if let Some(file) = file {
        merged = merged.merge(file);
    }
    merged.merge(cli).into_settings()
}

/// Loads settings for `app_name` from every layer.
pub fn load_config(app_name: &str, default_port: u16) -> Result<Settings> {
    dotenvy::dotenv().ok();
    let cli = Config::parse();

    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.conf", app_name)));
    let file = read_config_file(&config_path)?;

    Ok(build_settings(Config::defaults(default_port), file, cli))
}
