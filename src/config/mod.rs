use crate::metering_sml::CrcMode;
use crate::obis_utils::canonical_register_id;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("Unable to parse YAML config: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("Unable to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn pulse_timeout_default() -> u64 { return 10 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PulseConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    /// Sent as `node_id` query parameter, numbers are accepted as well
    #[serde(deserialize_with = "string_or_number")]
    pub node: String,
    /// Seconds before a request is given up
    #[serde(default="pulse_timeout_default")]
    pub timeout: u64,
}

/// How one register is turned into an output field
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ObisRule {
    pub name: String,
    #[serde(default)]
    pub factor: Option<f64>,
    /// Decimal places, negative values round to tens, hundreds, ...
    #[serde(default)]
    pub round: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TlsConfig {
    pub ca_file: String,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
}

fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_client_name_default() -> String { return "pulse2mqtt".to_string() }
fn mqtt_keep_alive_default() -> u64 { return 60 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    #[serde(default="mqtt_keep_alive_default")]
    pub keep_alive: u64,
    pub tls: Option<TlsConfig>,
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

fn log_level_default() -> String { return "info".to_string() }
fn alive_default() -> u64 { return 300 }
fn failure_threshold_default() -> u32 { return 3 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default="log_level_default")]
    pub log_level: String,
    pub log_file: Option<String>,
    pub pulse: PulseConfig,
    /// Seconds between two polls
    pub poll: f64,
    /// Seconds between two liveness records
    #[serde(default="alive_default")]
    pub alive: u64,
    /// Consecutive failed cycles after which the process gives up
    #[serde(default="failure_threshold_default")]
    pub failure_threshold: u32,
    #[serde(default)]
    pub crc: CrcMode,
    #[serde(default)]
    pub obis: HashMap<String, ObisRule>,
    /// Constant fields merged into every message
    #[serde(rename = "static", default)]
    pub static_fields: Map<String, Value>,
    pub mqtt: Option<MqttConfig>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(serde_json::Number),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}

impl Config {
    /// Read and validate the config, JSON for `.json` files and YAML otherwise
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let is_json = path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;
        config.validated()
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(contents)?;
        config.validated()
    }

    fn validated(mut self) -> Result<Self, ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.pulse.url.trim().is_empty() {
            return invalid("pulse.url must not be empty".to_string());
        }
        if self.poll <= 0.0 || Duration::try_from_secs_f64(self.poll).is_err() {
            return invalid(format!("poll must be a positive number of seconds, got {}", self.poll));
        }
        if self.pulse.timeout == 0 {
            return invalid("pulse.timeout must be at least 1 second".to_string());
        }
        if self.failure_threshold == 0 {
            return invalid("failure_threshold must be at least 1".to_string());
        }

        if let Some(mqtt) = &self.mqtt {
            if mqtt.qos > 2 {
                return invalid(format!("mqtt.qos must be 0, 1 or 2, got {}", mqtt.qos));
            }
            if mqtt.keep_alive < 5 {
                return invalid("mqtt.keep_alive must be at least 5 seconds".to_string());
            }
            if mqtt.topic.is_empty() {
                return invalid("mqtt.topic must not be empty".to_string());
            }
        }

        /* Registers are looked up by their canonical id */
        let mut rules = HashMap::with_capacity(self.obis.len());
        for (key, rule) in self.obis.drain() {
            if rule.name.is_empty() {
                return invalid(format!("obis rule for {} has an empty name", key));
            }
            let id = canonical_register_id(&key);
            if rules.insert(id.clone(), rule).is_some() {
                return invalid(format!("register {} is configured twice", id));
            }
        }
        self.obis = rules;

        Ok(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll)
    }

    pub fn alive_interval(&self) -> Duration {
        Duration::from_secs(self.alive)
    }

    /// Broker settings, required once the MQTT sink is selected
    pub fn require_mqtt(&self) -> Result<&MqttConfig, ConfigError> {
        self.mqtt.as_ref()
            .ok_or_else(|| ConfigError::Invalid("mqtt section is required to publish to a broker".to_string()))
    }
}
