//! Configuration management for edgelinkd.
//!
//! Loads the gateway configuration from a YAML file and validates it before
//! any poller is started. Configuration problems are the only fatal errors
//! of the process, so everything checkable is checked here.

use crate::error::ConfigError;
use crate::models::DeviceSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default config file path
pub const DEFAULT_CONFIG_PATH: &str = "configs/example.yaml";

/// Default MQTT port when the broker URL omits one
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Which publisher implementation forwards readings downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    /// Log every reading locally; no broker needed
    #[default]
    Console,
    /// Publish to an MQTT broker with QoS 1
    Mqtt,
}

/// Downstream broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub publisher: PublisherKind,

    /// Broker address, e.g. tcp://localhost:1883
    #[serde(default = "default_mqtt_url")]
    pub mqtt_url: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic prefix; readings go to `{base_topic}/{device_id}`
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// How long a publish may wait for the broker's acknowledgment
    #[serde(default = "default_ack_timeout", with = "humantime_serde")]
    pub ack_timeout: Duration,

    /// Upper bound on the graceful disconnect at shutdown
    #[serde(default = "default_disconnect_timeout", with = "humantime_serde")]
    pub disconnect_timeout: Duration,

    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,
}

fn default_mqtt_url() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_client_id() -> String {
    "edgelink".to_string()
}

fn default_base_topic() -> String {
    "edgelink".to_string()
}

fn default_ack_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_disconnect_timeout() -> Duration {
    Duration::from_millis(250)
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            publisher: PublisherKind::default(),
            mqtt_url: default_mqtt_url(),
            client_id: default_client_id(),
            base_topic: default_base_topic(),
            ack_timeout: default_ack_timeout(),
            disconnect_timeout: default_disconnect_timeout(),
            keep_alive: default_keep_alive(),
        }
    }
}

impl BrokerConfig {
    /// Split `mqtt_url` into host and port.
    ///
    /// Accepts `tcp://host[:port]`, `mqtt://host[:port]` or a bare `host[:port]`.
    pub fn endpoint(&self) -> Result<(String, u16), ConfigError> {
        let url = self.mqtt_url.trim();
        let rest = match url.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => {
                return Err(ConfigError::invalid(format!(
                    "unsupported broker scheme '{}' in {}",
                    scheme, url
                )))
            }
            None => url,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConfigError::invalid(format!("invalid broker port '{}' in {}", port, url))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_MQTT_PORT),
        };

        if host.is_empty() {
            return Err(ConfigError::invalid(format!("missing broker host in '{}'", url)));
        }
        Ok((host.to_string(), port))
    }

    /// Topic a device's readings are published to.
    pub fn topic_for(&self, device_id: &str) -> String {
        device_topic(&self.base_topic, device_id)
    }
}

/// `{base_topic}/{device_id}`, tolerating a trailing slash on the base.
pub fn device_topic(base_topic: &str, device_id: &str) -> String {
    format!("{}/{}", base_topic.trim_end_matches('/'), device_id)
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Listen address for the query interface
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    pub devices: Vec<DeviceSpec>,

    /// Grace period for pollers to drain after the shutdown signal
    #[serde(default = "default_shutdown_wait", with = "humantime_serde")]
    pub shutdown_wait: Duration,
}

fn default_http_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_shutdown_wait() -> Duration {
    Duration::from_secs(2)
}

impl Config {
    /// Load and validate config from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate config from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::invalid("no devices configured"));
        }

        let mut seen = HashSet::new();
        for spec in &self.devices {
            if spec.id.trim().is_empty() {
                return Err(ConfigError::invalid("device with empty id"));
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(ConfigError::invalid(format!("duplicate device id '{}'", spec.id)));
            }
            if spec.poll_every.is_zero() {
                return Err(ConfigError::invalid(format!(
                    "device '{}': poll_every must be positive",
                    spec.id
                )));
            }
            if !spec.jitter.is_finite() || spec.jitter < 0.0 {
                return Err(ConfigError::invalid(format!(
                    "device '{}': jitter must be a non-negative number",
                    spec.id
                )));
            }
        }

        if self.broker.base_topic.trim_matches('/').is_empty() {
            return Err(ConfigError::invalid("broker.base_topic must not be empty"));
        }
        if self.broker.publisher == PublisherKind::Mqtt {
            self.broker.endpoint()?;
            if self.broker.keep_alive < Duration::from_secs(1) {
                return Err(ConfigError::invalid("broker.keep_alive must be at least 1s"));
            }
            if self.broker.ack_timeout.is_zero() {
                return Err(ConfigError::invalid("broker.ack_timeout must be positive"));
            }
        }
        Ok(())
    }
}
