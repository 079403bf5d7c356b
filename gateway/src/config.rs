use std::time::Duration;

use batchq_common::{ImageSpec, StoreConfig};
use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use crate::waiter::{PollPolicy, WaitPolicy};

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Shape and dtype filled in when a request leaves them out.
    #[serde(default)]
    pub image: ImageSpec,
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// How long a request waits for its result.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl WaitConfig {
    pub fn policy(&self) -> WaitPolicy {
        WaitPolicy {
            notify_timeout: Duration::from_millis(self.notify_timeout_ms),
            poll: PollPolicy {
                interval: Duration::from_millis(self.poll_interval_ms),
                max_attempts: self.max_poll_attempts,
            },
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            notify_timeout_ms: default_notify_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_notify_timeout_ms() -> u64 {
    30_000
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_max_poll_attempts() -> u32 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (GATEWAY__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.store.queue, "image_queue");
        assert_eq!(config.image.shape(), vec![1, 224, 224, 3]);
        assert_eq!(config.wait.policy(), WaitPolicy::default());
    }

    #[test]
    fn test_wait_overrides() {
        let config: Config = serde_json::from_str(
            r#"{"wait": {"notify_timeout_ms": 500, "max_poll_attempts": 2}}"#,
        )
        .unwrap();
        let policy = config.wait.policy();
        assert_eq!(policy.notify_timeout, Duration::from_millis(500));
        assert_eq!(policy.poll.interval, Duration::from_millis(250));
        assert_eq!(policy.total_budget(), Duration::from_millis(1000));
    }
}
