//! YAML configuration loading for mqtt-ruler
//!
//! This crate provides YAML configuration loading with support for a few
//! custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use ruler_config::{load_config, RulerConfig};
//!
//! let config: RulerConfig<serde_yaml::Value> = load_config("/config", "ruler.yaml")?;
//! println!("broker at {}:{}", config.broker.host, config.broker.port);
//! ```

mod error;
mod loader;
mod secrets;
mod settings;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::{Secrets, SECRETS_FILE};
pub use settings::{load_config, BrokerConfig, LoggingConfig, RulerConfig};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
