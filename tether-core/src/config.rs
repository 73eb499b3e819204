//! JSON configuration for the resilience layer
//!
//! ```json
//! {
//!   "retry": { "max_retries": 5, "initial_delay_ms": 500 },
//!   "connection": { "auto_reconnect": false },
//!   "queue": { "capacity": 50, "storage_key": "chat.pending" }
//! }
//! ```
//!
//! Every section and field is optional; anything missing keeps its default.

use crate::connection::ConnectionMonitorConfig;
use crate::queue::QueueConfig;
use crate::retry::RetryPolicyOptions;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for every component of the resilience layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TetherConfig {
    pub retry: RetryPolicyOptions,
    pub connection: ConnectionMonitorConfig,
    pub queue: QueueConfig,
}

impl TetherConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Check every section's constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.connection.initial_reconnect_delay > self.connection.max_reconnect_delay {
            return Err(ConfigError::Invalid(
                "initial_reconnect_delay must not exceed max_reconnect_delay".to_string(),
            ));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "queue max_attempts must be at least 1".to_string(),
            ));
        }
        if self.queue.storage_key.is_empty() {
            return Err(ConfigError::Invalid(
                "queue storage_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from a JSON file
///
/// The path is expanded using shell expansion (e.g., `~/.config/tether.json`).
pub async fn load_config_file(path: impl AsRef<Path>) -> Result<TetherConfig, ConfigError> {
    let path_str = path.as_ref().to_string_lossy().to_string();
    let expanded_path = shellexpand::tilde(&path_str);
    let path = Path::new(expanded_path.as_ref());

    let content = tokio::fs::read_to_string(path).await?;
    let config = TetherConfig::from_json(&content)?;
    log::debug!("loaded configuration from {}", path.display());
    Ok(config)
}

/// Configuration file format
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    retry: RetrySection,
    connection: ConnectionSection,
    queue: QueueSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetrySection {
    max_retries: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    use_jitter: Option<bool>,
    jitter_fraction: Option<f64>,
    retry_server_errors: Option<bool>,
    max_server_error_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConnectionSection {
    auto_reconnect: Option<bool>,
    max_reconnect_attempts: Option<u32>,
    initial_reconnect_delay_ms: Option<u64>,
    max_reconnect_delay_ms: Option<u64>,
    reconnect_jitter_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct QueueSection {
    capacity: Option<usize>,
    max_attempts: Option<u32>,
    storage_key: Option<String>,
}

impl ConfigFile {
    fn into_config(self) -> TetherConfig {
        let retry_defaults = RetryPolicyOptions::default();
        let retry = RetryPolicyOptions {
            max_retries: self.retry.max_retries.unwrap_or(retry_defaults.max_retries),
            initial_delay: millis_or(self.retry.initial_delay_ms, retry_defaults.initial_delay),
            max_delay: millis_or(self.retry.max_delay_ms, retry_defaults.max_delay),
            backoff_multiplier: self
                .retry
                .backoff_multiplier
                .unwrap_or(retry_defaults.backoff_multiplier),
            use_jitter: self.retry.use_jitter.unwrap_or(retry_defaults.use_jitter),
            jitter_fraction: self
                .retry
                .jitter_fraction
                .unwrap_or(retry_defaults.jitter_fraction),
            retry_server_errors: self
                .retry
                .retry_server_errors
                .unwrap_or(retry_defaults.retry_server_errors),
            max_server_error_retries: self
                .retry
                .max_server_error_retries
                .unwrap_or(retry_defaults.max_server_error_retries),
        };

        let connection_defaults = ConnectionMonitorConfig::default();
        let connection = ConnectionMonitorConfig {
            auto_reconnect: self
                .connection
                .auto_reconnect
                .unwrap_or(connection_defaults.auto_reconnect),
            max_reconnect_attempts: self
                .connection
                .max_reconnect_attempts
                .unwrap_or(connection_defaults.max_reconnect_attempts),
            initial_reconnect_delay: millis_or(
                self.connection.initial_reconnect_delay_ms,
                connection_defaults.initial_reconnect_delay,
            ),
            max_reconnect_delay: millis_or(
                self.connection.max_reconnect_delay_ms,
                connection_defaults.max_reconnect_delay,
            ),
            reconnect_jitter: millis_or(
                self.connection.reconnect_jitter_ms,
                connection_defaults.reconnect_jitter,
            ),
        };

        let queue_defaults = QueueConfig::default();
        let queue = QueueConfig {
            capacity: self.queue.capacity.unwrap_or(queue_defaults.capacity),
            max_attempts: self.queue.max_attempts.unwrap_or(queue_defaults.max_attempts),
            storage_key: self.queue.storage_key.unwrap_or(queue_defaults.storage_key),
        };

        TetherConfig {
            retry,
            connection,
            queue,
        }
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}
