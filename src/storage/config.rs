//! Application configuration.
//!
//! Loaded from TOML; every section falls back to defaults when absent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::milestones::locks::LockPolicy;
use crate::progress::retry::RetryPolicy;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database settings
    pub database: DatabaseSettings,
    /// Retry settings for whole ingestion units of work
    pub retry: RetrySettings,
    /// Backoff for per-milestone lock acquisition
    pub locks: RetrySettings,
    /// Totals cache settings
    pub cache: CacheSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            retry: RetrySettings::default(),
            locks: RetrySettings {
                max_attempts: 8,
                initial_backoff_ms: 5,
                max_backoff_ms: 200,
            },
            cache: CacheSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Default configuration rooted at the given data directory.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        let mut config = Self::default();
        config.database.path = data_dir.join("rideledger.db");
        config
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_secs >= self.cache.ingestion_cadence_secs {
            return Err(ConfigError::Invalid(format!(
                "cache.ttl_secs ({}) must be below cache.ingestion_cadence_secs ({})",
                self.cache.ttl_secs, self.cache.ingestion_cadence_secs
            )));
        }
        if self.retry.max_attempts == 0 || self.locks.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms
            || self.locks.initial_backoff_ms > self.locks.max_backoff_ms
        {
            return Err(ConfigError::Invalid(
                "initial_backoff_ms must not exceed max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy for ingestion units of work.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    /// Backoff policy for milestone locks.
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            max_attempts: self.locks.max_attempts,
            initial_backoff: Duration::from_millis(self.locks.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.locks.max_backoff_ms),
        }
    }

    /// Cache time-to-live.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file path
    pub path: PathBuf,
    /// How long SQLite waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: get_data_dir().join("rideledger.db"),
            busy_timeout_ms: 5000,
        }
    }
}

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
        }
    }
}

/// Totals cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// Expected interval between ingestion cycles in seconds
    pub ingestion_cadence_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 55,
            ingestion_cadence_secs: 60,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "rideledger", "RideLedger")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "rideledger", "RideLedger")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = get_config_path();

    if !path.exists() {
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load application configuration from a file.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Save application configuration to a file.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
