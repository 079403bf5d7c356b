//! Configuration for the model server.

use std::time::Duration;

use batchq_common::{ImageSpec, StoreConfig};
use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the model server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    /// Input shape/dtype the model expects; jobs that differ are rejected.
    #[serde(default)]
    pub image: ImageSpec,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Batch dispatch loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of jobs drained per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sleep between drains when the queue is empty.
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    /// Lifetime of an uncollected result.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
}

impl DispatchConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            idle_sleep_ms: default_idle_sleep_ms(),
            result_ttl_secs: default_result_ttl_secs(),
        }
    }
}

/// Model endpoint (TensorFlow Serving style REST API).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Newline-separated class labels, index-aligned with model outputs.
    #[serde(default)]
    pub labels_path: Option<String>,
    /// Number of ranked predictions kept per image.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
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
fn default_batch_size() -> usize {
    32
}
fn default_idle_sleep_ms() -> u64 {
    250
}
fn default_result_ttl_secs() -> u64 {
    3600
}
fn default_model() -> String {
    "resnet50".to_string()
}
fn default_top_k() -> usize {
    5
}
fn default_engine_timeout() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (MODEL_SERVER__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("dispatch.batch_size", default_batch_size() as i64)?
            .set_default("dispatch.idle_sleep_ms", default_idle_sleep_ms() as i64)?
            .set_default("dispatch.result_ttl_secs", default_result_ttl_secs() as i64)?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("MODEL_SERVER")
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
    fn test_default_dispatch_config() {
        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.batch_size, 32);
        assert_eq!(dispatch.idle_sleep(), Duration::from_millis(250));
        assert_eq!(dispatch.result_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"engine": {"base_url": "http://localhost:8501"}}"#,
        )
        .unwrap();
        assert_eq!(config.engine.model, "resnet50");
        assert_eq!(config.engine.top_k, 5);
        assert!(config.engine.labels_path.is_none());
        assert_eq!(config.store.queue, "image_queue");
        assert_eq!(config.image.shape(), vec![1, 224, 224, 3]);
        assert_eq!(config.logging.level, "info");
    }
}
