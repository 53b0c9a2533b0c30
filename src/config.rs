//! Configuration system for the relay pipeline
//!
//! Configuration comes from an optional TOML file, then environment overrides.
//! Every field has a default, so a worker started with no file at all talks to
//! `localhost:5672`.

use crate::protocol::queues::{validate_queue_name, DEAD_LETTER_QUEUE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable overriding `broker.host`
pub const HOST_ENV: &str = "RABBITMQ_HOST";
/// Environment variable overriding `broker.port`
pub const PORT_ENV: &str = "RABBITMQ_PORT";

/// Main relay configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub crawler: CrawlerSection,
    #[serde(default)]
    pub fetcher: FetcherSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// AMQP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Virtual host
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Per-attempt connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Connection attempts before startup gives up
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Wait for broker confirmation of every publish
    #[serde(default = "default_true")]
    pub publisher_confirms: bool,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            vhost: default_vhost(),
            connect_timeout_secs: default_connect_timeout(),
            connect_attempts: default_connect_attempts(),
            publisher_confirms: true,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

/// Worker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSection {
    /// Seconds without a delivery before the worker re-checks its connection
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Queue receiving rejected deliveries; empty disables dead-lettering
    #[serde(default = "default_dead_letter_queue")]
    pub dead_letter_queue: String,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            dead_letter_queue: default_dead_letter_queue(),
        }
    }
}

impl WorkerSection {
    pub fn dead_letter_queue(&self) -> Option<&str> {
        let name = self.dead_letter_queue.trim();
        (!name.is_empty()).then_some(name)
    }
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_dead_letter_queue() -> String {
    DEAD_LETTER_QUEUE.to_string()
}

/// Mock crawler section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlerSection {
    /// Delay between two published tweets
    #[serde(default = "default_publish_interval")]
    pub publish_interval_ms: u64,
}

impl Default for CrawlerSection {
    fn default() -> Self {
        Self {
            publish_interval_ms: default_publish_interval(),
        }
    }
}

fn default_publish_interval() -> u64 {
    500
}

/// URL fetcher simulator section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetcherSection {
    /// Simulated network latency per fetch
    #[serde(default = "default_simulated_latency")]
    pub simulated_latency_ms: u64,
}

impl Default for FetcherSection {
    fn default() -> Self {
        Self {
            simulated_latency_ms: default_simulated_latency(),
        }
    }
}

fn default_simulated_latency() -> u64 {
    1000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: RelayConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = RelayConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RABBITMQ_HOST` / `RABBITMQ_PORT` over file values
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Override logic with an injectable lookup so tests never touch process env
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.trim().is_empty()) {
            self.broker.host = host.trim().to_string();
        }

        if let Some(port) = lookup(PORT_ENV) {
            self.broker.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnvVar {
                    name: PORT_ENV.to_string(),
                    value: port.clone(),
                })?;
        }

        Ok(())
    }

    /// Validate field ranges and queue names
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be non-zero".to_string(),
            ));
        }
        if self.broker.connect_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.worker.idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker.idle_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(queue) = self.worker.dead_letter_queue() {
            validate_queue_name(queue).map_err(|e| {
                ConfigError::InvalidConfig(format!("worker.dead_letter_queue: {e}"))
            })?;
        }
        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
host = "localhost"
port = 5672
connect_timeout_secs = 1
connect_attempts = 1

[worker]
idle_timeout_secs = 1

[crawler]
publish_interval_ms = 0

[fetcher]
simulated_latency_ms = 0
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[broker]
host = "rabbit.internal"
port = 5673
vhost = "pipeline"
connect_timeout_secs = 3
connect_attempts = 7
publisher_confirms = false

[worker]
idle_timeout_secs = 5
dead_letter_queue = "rejected"

[crawler]
publish_interval_ms = 100

[fetcher]
simulated_latency_ms = 20
"#;

        let config: RelayConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.broker.host, "rabbit.internal");
        assert_eq!(config.broker.port, 5673);
        assert_eq!(config.broker.vhost, "pipeline");
        assert_eq!(config.broker.connect_attempts, 7);
        assert!(!config.broker.publisher_confirms);
        assert_eq!(config.worker.dead_letter_queue(), Some("rejected"));
        assert_eq!(config.crawler.publish_interval_ms, 100);
        assert_eq!(config.fetcher.simulated_latency_ms, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: RelayConfig = toml::from_str("").unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 5672);
        assert_eq!(config.broker.vhost, "/");
        assert!(config.broker.publisher_confirms);
        assert_eq!(config.worker.dead_letter_queue(), Some(DEAD_LETTER_QUEUE));
        assert_eq!(config.fetcher.simulated_latency_ms, 1000);
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config: RelayConfig = toml::from_str("[broker]\nhost = \"mq\"\n").unwrap();
        assert_eq!(config.broker.host, "mq");
        assert_eq!(config.broker.port, 5672);
        assert_eq!(config.broker.connect_attempts, 5);
    }

    #[test]
    fn test_empty_dead_letter_queue_disables_dead_lettering() {
        let config: RelayConfig =
            toml::from_str("[worker]\ndead_letter_queue = \"\"\n").unwrap();
        assert_eq!(config.worker.dead_letter_queue(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_host_and_port() {
        let mut config = RelayConfig::default();
        config
            .apply_overrides(lookup_from(&[(HOST_ENV, "rabbitmq"), (PORT_ENV, "5999")]))
            .unwrap();
        assert_eq!(config.broker.host, "rabbitmq");
        assert_eq!(config.broker.port, 5999);
    }

    #[test]
    fn test_blank_host_env_is_ignored() {
        let mut config = RelayConfig::default();
        config
            .apply_overrides(lookup_from(&[(HOST_ENV, "   ")]))
            .unwrap();
        assert_eq!(config.broker.host, "localhost");
    }

    #[test]
    fn test_invalid_port_env_is_an_error() {
        let mut config = RelayConfig::default();
        let result = config.apply_overrides(lookup_from(&[(PORT_ENV, "not-a-port")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut config = RelayConfig::default();
        config.broker.connect_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_dead_letter_queue() {
        let mut config = RelayConfig::default();
        config.worker.dead_letter_queue = "amq.dead".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dead_letter_queue"));
    }

    #[test]
    fn test_config_serializes_back_to_toml() {
        let config = RelayConfig::test_config();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: RelayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
