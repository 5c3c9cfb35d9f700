//! Sync configuration
//!
//! One canonical configuration for the queue, the engine and the
//! connectivity monitor. Values come from, in increasing precedence:
//! built-in defaults, an optional TOML file, `FINTRACK_*` environment
//! variables.
//!
//! ```toml
//! server_url = "https://api.example.com"
//! max_retries = 3
//! base_delay_ms = 1000
//! conflict_policy = "merge"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::offline::retry::RetryPolicy;
use crate::shared::operation::ConflictResolution;

/// Default retry budget per operation
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default backoff base
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Backoff ceiling
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_COMPLETED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_DEGRADED_LATENCY: Duration = Duration::from_millis(1500);

/// Configuration for the sync subsystem
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the remote apply endpoint
    pub server_url: Option<String>,
    /// SQLite file holding entities and the queue
    pub database_path: PathBuf,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on a single remote apply call
    pub request_timeout: Duration,
    /// Periodic drain trigger while online
    pub sync_interval: Duration,
    /// Run the periodic trigger at all
    pub auto_sync: bool,
    /// Applied automatically to new conflicts; `None` leaves them for the user
    pub conflict_policy: Option<ConflictResolution>,
    /// How long completed entries stay archived
    pub completed_retention: Duration,
    /// Reachability probe target
    pub probe_url: Option<String>,
    /// Probe latency above which the link counts as degraded
    pub degraded_latency: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            database_path: default_database_path(),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            auto_sync: true,
            conflict_policy: None,
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            probe_url: None,
            degraded_latency: DEFAULT_DEGRADED_LATENCY,
        }
    }
}

/// Platform data directory, falling back to the temp dir
pub fn default_database_path() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    path.push("fintrack");
    path.push("sync.db");
    path
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.server_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        if let Some(url) = &self.probe_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_retries",
                message: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.sync_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "sync_interval",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::InvalidValue {
                key: "max_delay",
                message: "must not be smaller than base_delay".to_string(),
            });
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "base_delay",
                message: "must be greater than zero".to_string(),
            });
        }
        if !RetryPolicy::from_config(self).is_strictly_increasing() {
            return Err(ConfigError::InvalidValue {
                key: "max_retries",
                message: format!(
                    "{} retries from a {:?} base would reach max_delay ({:?}) before the budget runs out",
                    self.max_retries, self.base_delay, self.max_delay
                ),
            });
        }
        Ok(())
    }

    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut builder = SyncConfig::builder();
        if let Some(url) = file.server_url {
            builder = builder.server_url(url);
        }
        if let Some(path) = file.database_path {
            builder = builder.database_path(path);
        }
        if let Some(n) = file.max_retries {
            builder = builder.max_retries(n);
        }
        if let Some(ms) = file.base_delay_ms {
            builder = builder.base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = file.max_delay_ms {
            builder = builder.max_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = file.request_timeout_ms {
            builder = builder.request_timeout(Duration::from_millis(ms));
        }
        if let Some(secs) = file.sync_interval_secs {
            builder = builder.sync_interval(Duration::from_secs(secs));
        }
        if let Some(auto_sync) = file.auto_sync {
            builder = builder.auto_sync(auto_sync);
        }
        if let Some(policy) = file.conflict_policy {
            builder = builder.conflict_policy(parse_policy(&policy)?);
        }
        if let Some(hours) = file.completed_retention_hours {
            builder = builder.completed_retention(Duration::from_secs(hours * 60 * 60));
        }
        if let Some(url) = file.probe_url {
            builder = builder.probe_url(url);
        }
        builder.build()
    }

    /// Apply `FINTRACK_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FINTRACK_SYNC_URL") {
            self.server_url = Some(url);
        }
        if let Some(path) = lookup("FINTRACK_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("FINTRACK_MAX_RETRIES") {
            self.max_retries = u32::try_from(parse_number("FINTRACK_MAX_RETRIES", &value)?).map_err(|_| {
                ConfigError::InvalidValue {
                    key: "FINTRACK_MAX_RETRIES",
                    message: format!("'{}' is out of range", value),
                }
            })?;
        }
        if let Some(value) = lookup("FINTRACK_BASE_DELAY_MS") {
            self.base_delay = Duration::from_millis(parse_number("FINTRACK_BASE_DELAY_MS", &value)?);
        }
        if let Some(value) = lookup("FINTRACK_REQUEST_TIMEOUT_MS") {
            self.request_timeout =
                Duration::from_millis(parse_number("FINTRACK_REQUEST_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("FINTRACK_CONFLICT_POLICY") {
            self.conflict_policy = match value.as_str() {
                "" | "manual" => None,
                other => Some(parse_policy(other)?),
            };
        }
        Ok(())
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        key,
        message: format!("'{}' is not a non-negative integer", value),
    })
}

fn parse_policy(value: &str) -> Result<ConflictResolution, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: "conflict_policy",
        message: format!("'{}' is not one of local, remote, merge, manual", value),
    })
}

/// On-disk shape of the TOML file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    server_url: Option<String>,
    database_path: Option<PathBuf>,
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    sync_interval_secs: Option<u64>,
    auto_sync: Option<bool>,
    conflict_policy: Option<String>,
    completed_retention_hours: Option<u64>,
    probe_url: Option<String>,
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: Option<SyncConfig>,
}

impl SyncConfigBuilder {
    fn config(&mut self) -> &mut SyncConfig {
        self.config.get_or_insert_with(SyncConfig::default)
    }

    /// Set the server URL
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config().server_url = Some(url.into());
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().database_path = path.into();
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config().max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config().base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config().max_delay = delay;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config().request_timeout = timeout;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config().sync_interval = interval;
        self
    }

    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.config().auto_sync = enabled;
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictResolution) -> Self {
        self.config().conflict_policy = Some(policy);
        self
    }

    pub fn completed_retention(mut self, retention: Duration) -> Self {
        self.config().completed_retention = retention;
        self
    }

    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.config().probe_url = Some(url.into());
        self
    }

    pub fn degraded_latency(mut self, latency: Duration) -> Self {
        self.config().degraded_latency = latency;
        self
    }

    /// Build the configuration
    pub fn build(mut self) -> Result<SyncConfig, ConfigError> {
        let config = self.config().clone();
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("failed to read {path:?}: {message}")]
    Io { path: PathBuf, message: String },
}
