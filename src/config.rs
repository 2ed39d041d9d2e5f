use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::counters::{default_counters, CounterValues};
use crate::mqtt::MqttConfig;

const APP_DIR: &str = "boothcounter";
const CONFIG_FILE: &str = "config.toml";
const COUNTERS_FILE: &str = "counters.toml";
pub const CONFIG_ENV: &str = "BOOTHCOUNTER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CountersConfig {
    pub file: PathBuf,
    /// Overrides on top of the built-in schema; extra names add counters.
    pub defaults: CounterValues,
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            file: data_dir().join(COUNTERS_FILE),
            defaults: CounterValues::new(),
        }
    }
}

impl CountersConfig {
    /// Built-in counters merged with the configured defaults.
    pub fn schema(&self) -> CounterValues {
        let mut schema = default_counters();
        schema.extend(self.defaults.iter().map(|(k, v)| (k.clone(), *v)));
        schema
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub counters: CountersConfig,
}

impl AppConfig {
    /// Resolves the config path: explicit argument, then `$BOOTHCOUNTER_CONFIG`, then
    /// the user config directory.
    pub fn locate(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| config_dir().join(CONFIG_FILE))
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(
                "Config file {} does not exist, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{PRINTED, TAKEN};

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::parse("").unwrap();

        assert_eq!(config.mqtt.broker_host, "localhost");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.mqtt.client_id, "PiBooth");
        assert_eq!(config.mqtt.topic, "PiBooth");
        assert_eq!(config.mqtt.credentials(), None);
        assert_eq!(config.counters.schema(), default_counters());
    }

    #[test]
    fn parses_full_config() {
        let config = AppConfig::parse(
            r#"
            [mqtt]
            broker_host = "broker.lan"
            broker_port = 8883
            credentials = ["booth", "secret"]
            client_id = "booth-1"
            topic = "events/booth"
            drain_timeout_secs = 1

            [counters]
            file = "/var/lib/booth/counters.toml"
            defaults = { remaining_duplicates = 3, strips = 0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.mqtt.broker_host, "broker.lan");
        assert_eq!(config.mqtt.broker_port, 8883);
        assert_eq!(config.mqtt.credentials(), Some(("booth", "secret")));
        assert_eq!(config.mqtt.topics().counters, "events/booth/counters");
        assert_eq!(config.mqtt.drain_timeout().as_secs(), 1);
        assert_eq!(config.mqtt.keep_alive_secs, 60);

        let schema = config.counters.schema();
        assert_eq!(schema["remaining_duplicates"], 3);
        assert_eq!(schema["strips"], 0);
        assert_eq!(schema[TAKEN], 0);
        assert_eq!(schema[PRINTED], 0);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[mqtt\nbroker_port = 1").unwrap();

        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn explicit_path_wins() {
        let path = PathBuf::from("/tmp/booth.toml");
        assert_eq!(AppConfig::locate(Some(path.clone())), path);
    }
}
