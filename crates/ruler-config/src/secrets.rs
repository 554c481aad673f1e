//! `secrets.yaml`: credentials kept out of the main configuration

use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

pub const SECRETS_FILE: &str = "secrets.yaml";

/// Flat key to string map
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    file: PathBuf,
    values: BTreeMap<String, String>,
}

impl Secrets {
    /// Read `secrets.yaml` from `config_dir`; no file means no secrets
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let file = config_dir.join(SECRETS_FILE);

        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(file = %file.display(), "No secrets file");
                return Ok(Self {
                    file,
                    values: BTreeMap::new(),
                });
            }
            Err(source) => return Err(ConfigError::Io { path: file, source }),
        };

        let raw: BTreeMap<String, Value> =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: file.clone(),
                source,
            })?;

        // Nested values cannot stand in for a scalar and are skipped
        let values: BTreeMap<String, String> = raw
            .into_iter()
            .filter_map(|(key, value)| scalar(value).map(|v| (key, v)))
            .collect();

        debug!(file = %file.display(), count = values.len(), "Loaded secrets");
        Ok(Self { file, values })
    }

    pub fn get(&self, key: &str) -> ConfigResult<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnknownSecret {
                key: key.to_string(),
                file: self.file.clone(),
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn scalar(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scalars_become_strings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SECRETS_FILE),
            "mqtt_username: mqtt\nmqtt_password: password\nmqtt_port: 1883\nnested: [1, 2]\n",
        )
        .unwrap();

        let secrets = Secrets::load(dir.path()).unwrap();
        assert_eq!(secrets.get("mqtt_username").unwrap(), "mqtt");
        assert_eq!(secrets.get("mqtt_port").unwrap(), "1883");
        assert_eq!(secrets.len(), 3);
        assert!(matches!(
            secrets.get("nested"),
            Err(ConfigError::UnknownSecret { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let secrets = Secrets::load(dir.path()).unwrap();
        assert!(secrets.is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SECRETS_FILE), "- not\n- a map\n").unwrap();
        assert!(matches!(
            Secrets::load(dir.path()),
            Err(ConfigError::Yaml { .. })
        ));
    }
}
