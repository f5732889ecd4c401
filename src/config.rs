//! Configuration for the sensor window agent.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! environment variables, then command-line flags. The result is checked
//! once by [`Config::validate`] before anything is started.

use crate::core::aggregate::LevelScale;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable names.
pub const ENV_MQTT_BROKER: &str = "MQTT_BROKER";
pub const ENV_MQTT_PORT: &str = "MQTT_PORT";
pub const ENV_MQTT_TOPIC: &str = "MQTT_TOPIC";
pub const ENV_WINDOW_SECONDS: &str = "WINDOW_SECONDS";
pub const ENV_HTTP_HOST: &str = "HTTP_HOST";
pub const ENV_HTTP_PORT: &str = "HTTP_PORT";

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection and topic
    pub broker: BrokerConfig,

    /// Width of the trailing window, also the aggregation interval
    #[serde(with = "duration_serde")]
    pub window_duration: Duration,

    /// Reading field that gets averaged
    pub field: String,

    /// Raw range used to express the average as a level (none disables it)
    pub level: Option<LevelScale>,

    /// Query interface
    pub server: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            window_duration: Duration::from_secs(2),
            field: "analog".to_string(),
            level: Some(LevelScale::default()),
            server: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location if it exists.
    ///
    /// An explicit path must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let default_path = Self::config_path();
                if default_path.exists() {
                    Self::load_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-window-agent")
            .join("config.json")
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_MQTT_BROKER) {
            self.broker.host = host;
        }
        if let Some(port) = lookup(ENV_MQTT_PORT) {
            self.broker.port = port.trim().parse().map_err(|e| {
                ConfigError::InvalidBroker(format!("{ENV_MQTT_PORT}='{port}': {e}"))
            })?;
        }
        if let Some(topic) = lookup(ENV_MQTT_TOPIC) {
            self.broker.topic = topic;
        }
        if let Some(secs) = lookup(ENV_WINDOW_SECONDS) {
            self.window_duration = parse_window_secs(&secs)?;
        }
        if let Some(host) = lookup(ENV_HTTP_HOST) {
            self.server.host = host;
        }
        if let Some(port) = lookup(ENV_HTTP_PORT) {
            self.server.port = port.trim().parse().map_err(|e| {
                ConfigError::InvalidServer(format!("{ENV_HTTP_PORT}='{port}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Check that the configuration can be used to start the agent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_duration.is_zero() {
            return Err(ConfigError::InvalidWindow(
                "window duration must be positive".to_string(),
            ));
        }
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidBroker("broker host is empty".to_string()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidBroker("broker port is 0".to_string()));
        }
        if self.broker.topic.trim().is_empty() {
            return Err(ConfigError::InvalidBroker("topic is empty".to_string()));
        }
        if self.field.is_empty() {
            return Err(ConfigError::InvalidField);
        }
        if let Some(scale) = &self.level {
            scale.validate()?;
        }
        Ok(())
    }
}

/// Parse a window length given in (possibly fractional) seconds.
pub fn parse_window_secs(value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidWindow(format!("'{value}': {e}")))?;

    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidWindow(format!(
            "'{value}': must be a positive number of seconds"
        )));
    }

    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidWindow(format!("'{value}': {e}")))
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Topic carrying sensor readings
    pub topic: String,
    /// Prefix of the per-process client identifier
    pub client_id_prefix: String,
    #[serde(with = "duration_serde")]
    pub keep_alive: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.4.2".to_string(),
            port: 1883,
            topic: "sensor/sonido".to_string(),
            client_id_prefix: "sensor-window".to_string(),
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// Query interface settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Origins allowed by CORS
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5173,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://127.0.0.1:3001".to_string(),
            ],
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidWindow(String),
    InvalidBroker(String),
    InvalidServer(String),
    InvalidLevelScale(String),
    InvalidField,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidWindow(e) => write!(f, "Invalid window duration: {e}"),
            ConfigError::InvalidBroker(e) => write!(f, "Invalid broker settings: {e}"),
            ConfigError::InvalidServer(e) => write!(f, "Invalid server settings: {e}"),
            ConfigError::InvalidLevelScale(e) => write!(f, "Invalid level scale: {e}"),
            ConfigError::InvalidField => write!(f, "Aggregated field name is empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as seconds.
mod duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
