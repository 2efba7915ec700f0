//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the wait-alert.toml file.
//! It provides a centralized way to configure the wait-time provider, the polling
//! schedule, where preferences are stored and how notifications are delivered.
//!
//! Every section and field has a default, so a config file only needs the values
//! that differ from them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default config file name, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "wait-alert.toml";

/// Rejected configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("api.base_url must not be empty")]
    EmptyBaseUrl,

    #[error("schedule.interval_minutes must be at least 1")]
    ZeroInterval,

    #[error("schedule.retry_max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("config IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("config serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration loaded from wait-alert.toml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Wait-time provider configuration
    pub api: ApiConfig,
    /// Background polling configuration
    pub schedule: ScheduleConfig,
    /// Durable preferences (alerts and favorites)
    pub storage: StorageConfig,
    /// Notification delivery
    pub notify: NotifyConfig,
}

/// Wait-time REST provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Provider base URL, without a trailing `/v1/...` path
    pub base_url: String,
    /// Park identifier sent in the `park` header (e.g. "europapark")
    pub park: String,
    /// Language sent in the `language` header, affects attraction names
    pub language: String,
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
}

/// Background polling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes between recurring alert checks
    pub interval_minutes: u64,
    /// Skip checks while the provider host is unreachable
    pub require_network: bool,
    /// First retry delay after a failed check, in seconds
    pub retry_initial_secs: u64,
    /// Upper bound for the exponential retry delay, in seconds
    pub retry_max_secs: u64,
    /// Attempts per tick, including the first one
    pub retry_max_attempts: u32,
}

/// Durable preferences location
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON preferences file holding alerts and favorites
    pub path: PathBuf,
}

/// Notification delivery configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// External program plus leading arguments, e.g. `["notify-send", "-u", "critical"]`.
    /// Title and body are appended. Empty disables command delivery; notifications
    /// are always logged.
    pub command: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "https://api.wartezeiten.app".to_string(),
            park: "europapark".to_string(),
            language: "de".to_string(),
            timeout_secs: 15,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            interval_minutes: 15,
            require_network: true,
            retry_initial_secs: 30,
            retry_max_secs: 900,
            retry_max_attempts: 3,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: PathBuf::from("wait-alert-prefs.json"),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl Config {
    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        park = %config.api.park,
                        "config_loaded"
                    );
                    config
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "invalid config file, using defaults"
                    );
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Check values that would make the watcher misbehave rather than fail loudly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        if self.schedule.interval_minutes == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.schedule.retry_max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }

    /// Save current configuration to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        info!(path = %path.as_ref().display(), "config_saved");
        Ok(())
    }
}
