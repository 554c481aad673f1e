//! mqtt-ruler
//!
//! Loads the rule configuration, connects to the broker and runs every rule
//! until interrupted.
//!
//! The configuration path is taken from the first argument, then
//! `RULER_CONFIG`, then `config/ruler.yaml`.

use anyhow::{Context, Result};
use ruler_config::{load_config, BrokerConfig, RulerConfig};
use ruler_core::SystemClock;
use ruler_mqtt::{MqttSettings, MqttTransport};
use ruler_rules::{Dispatcher, RuleConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config/ruler.yaml";

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RULER_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

fn load(path: &Path) -> Result<RulerConfig<RuleConfig>> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file = path
        .file_name()
        .with_context(|| format!("{} is not a file", path.display()))?;

    load_config(dir, file).with_context(|| format!("Failed to load {}", path.display()))
}

/// `RUST_LOG` wins over the configured level
fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid logging level {level:?}"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
    Ok(())
}

fn mqtt_settings(broker: &BrokerConfig) -> MqttSettings {
    MqttSettings {
        client_id: broker.client_id.clone(),
        username: broker.username.clone(),
        password: broker.password.clone(),
        keep_alive: Duration::from_secs(broker.keep_alive_secs),
        reconnect_delay: Duration::from_millis(broker.reconnect_delay_ms),
        request_capacity: broker.request_capacity,
        ..MqttSettings::new(&broker.host, broker.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = load(&path)?;
    init_logging(&config.logging.level)?;

    info!(
        config = %path.display(),
        rules = config.rules.len(),
        "Starting mqtt-ruler"
    );

    let transport = Arc::new(MqttTransport::connect(mqtt_settings(&config.broker)));
    let mut dispatcher = Dispatcher::new(transport.clone(), Arc::new(SystemClock));
    let _lifecycle = dispatcher.watch_lifecycle();

    let rules = dispatcher.start(config.rules).await?;
    info!("mqtt-ruler is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for rule in rules {
        rule.abort();
    }
    transport.disconnect().await;

    Ok(())
}
