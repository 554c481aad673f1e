//! Typed top-level configuration
//!
//! ```yaml
//! broker:
//!   host: 10.8.0.62
//!   username: mqtt
//!   password: !secret mqtt_password
//! logging:
//!   level: debug
//! rules:
//!   - rule: nightlight
//!     ...
//! ```
//!
//! Rule definitions are opaque here; the rule engine supplies their type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

/// Complete configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: DeserializeOwned"))]
pub struct RulerConfig<R> {
    pub broker: BrokerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default = "Vec::new")]
    pub rules: Vec<R>,
}

impl<R: DeserializeOwned> RulerConfig<R> {
    /// Convert a tag-processed YAML document
    pub fn from_value(value: serde_yaml::Value, source: &Path) -> ConfigResult<Self> {
        serde_yaml::from_value(value).map_err(|e| ConfigError::Schema {
            path: source.to_path_buf(),
            source: e,
        })
    }
}

/// MQTT broker connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Client id prefix
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "mqtt-ruler".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_request_capacity() -> usize {
    64
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

/// Load and type a configuration file from `config_dir`
pub fn load_config<R: DeserializeOwned>(
    config_dir: impl Into<PathBuf>,
    file: impl AsRef<Path>,
) -> ConfigResult<RulerConfig<R>> {
    let mut loader = YamlLoader::new(config_dir)?;
    let value = loader.load_file(file.as_ref())?;
    RulerConfig::from_value(value, file.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("secrets.yaml"), "mqtt_password: password\n").unwrap();
        fs::write(
            dir.path().join("ruler.yaml"),
            r#"
broker:
  host: 10.8.0.62
  username: mqtt
  password: !secret mqtt_password
rules:
  - rule: button
    source: zigbee2mqtt/Kellerabgang_Button
"#,
        )
        .unwrap();

        let config: RulerConfig<serde_json::Value> = load_config(dir.path(), "ruler.yaml").unwrap();
        assert_eq!(config.broker.host, "10.8.0.62");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.password.as_deref(), Some("password"));
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert_eq!(config.broker.client_id, "mqtt-ruler");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0]["rule"], "button");
    }

    #[test]
    fn test_missing_broker_is_schema_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ruler.yaml"), "rules: []\n").unwrap();

        let result: ConfigResult<RulerConfig<serde_json::Value>> =
            load_config(dir.path(), "ruler.yaml");
        assert!(matches!(result, Err(ConfigError::Schema { .. })));
    }
}
