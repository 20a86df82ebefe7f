//! Server configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use heatwatch_core::{AlertSource, EngineConfig, Topics};

/// Server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub engine: EngineSettings,
    pub aggregation: AggregationConfig,
    pub mqtt: MqttConfig,
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate every section and report all problems at once.
    ///
    /// ```
    /// use heatwatch_service::Config;
    ///
    /// let config = Config::default();
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.engine.validate());
        errors.extend(self.aggregation.validate());
        errors.extend(self.mqtt.validate());
        errors.extend(self.notifications.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// Capacity of the live event channel. Subscribers that fall further
    /// behind than this lose the oldest events.
    pub broadcast_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            broadcast_buffer: 100,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
        } else {
            match self.bind.rsplit_once(':') {
                None => errors.push(ValidationError::new(
                    "server.bind",
                    format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                )),
                Some((_, port)) => match port.parse::<u16>() {
                    Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                    Ok(_) => {}
                    Err(_) => errors.push(ValidationError::new(
                        "server.bind",
                        format!("invalid port '{port}': must be a number 1-65535"),
                    )),
                },
            }
        }

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError::new(
                "server.broadcast_buffer",
                "broadcast buffer must be at least 1",
            ));
        }

        errors
    }
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: heatwatch_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        errors
    }
}

/// Ingestion engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Temperatures strictly above this open an alert episode (°C).
    pub alert_threshold: f64,
    /// Which input opens and closes alert episodes.
    pub alert_source: AlertSource,
    /// Events buffered between the MQTT client and the engine.
    pub queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            alert_threshold: 37.0,
            alert_source: AlertSource::Threshold,
            queue_capacity: 1024,
        }
    }
}

impl EngineSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            threshold: self.alert_threshold,
            alert_source: self.alert_source,
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.alert_threshold.is_finite() {
            errors.push(ValidationError::new(
                "engine.alert_threshold",
                "alert threshold must be a finite number",
            ));
        }
        if self.queue_capacity == 0 {
            errors.push(ValidationError::new(
                "engine.queue_capacity",
                "queue capacity must be at least 1",
            ));
        }
        errors
    }
}

/// Minimum aggregation interval in seconds.
pub const MIN_AGGREGATION_INTERVAL: u64 = 60;
/// Maximum aggregation interval in seconds (1 day).
pub const MAX_AGGREGATION_INTERVAL: u64 = 86_400;

/// Rollup scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub enabled: bool,
    /// Seconds between aggregation runs.
    pub interval_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
        }
    }
}

impl AggregationConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.interval_secs < MIN_AGGREGATION_INTERVAL {
            errors.push(ValidationError::new(
                "aggregation.interval_secs",
                format!(
                    "interval {} is too short (minimum {} seconds)",
                    self.interval_secs, MIN_AGGREGATION_INTERVAL
                ),
            ));
        } else if self.interval_secs > MAX_AGGREGATION_INTERVAL {
            errors.push(ValidationError::new(
                "aggregation.interval_secs",
                format!(
                    "interval {} is too long (maximum {} seconds / 1 day)",
                    self.interval_secs, MAX_AGGREGATION_INTERVAL
                ),
            ));
        }
        errors
    }
}

/// MQTT subscriber settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    /// Broker URL, `mqtt://host[:port]` or `mqtts://host[:port]`.
    pub broker: String,
    /// Client id; a random one is generated when empty.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive: u64,
    pub topics: Topics,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: "mqtt://localhost:1883".to_string(),
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: 30,
            topics: Topics::default(),
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        if let Err(message) = parse_broker_url(&self.broker) {
            errors.push(ValidationError::new("mqtt.broker", message));
        }
        if self.keep_alive < 5 {
            errors.push(ValidationError::new(
                "mqtt.keep_alive",
                format!(
                    "keep alive {} is too short (minimum 5 seconds)",
                    self.keep_alive
                ),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            errors.push(ValidationError::new(
                "mqtt.username",
                "username and password must be set together",
            ));
        }

        let names = ["temperature", "humidity", "alert", "cooling", "mode"];
        for (name, topic) in names.iter().zip(self.topics.all()) {
            if topic.is_empty() {
                errors.push(ValidationError::new(
                    format!("mqtt.topics.{name}"),
                    "topic cannot be empty",
                ));
            } else if topic.contains(['#', '+']) {
                errors.push(ValidationError::new(
                    format!("mqtt.topics.{name}"),
                    format!("topic '{topic}' cannot contain wildcards"),
                ));
            }
        }

        errors
    }
}

/// Parse an MQTT broker URL into (host, port, use_tls).
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool), String> {
    let (use_tls, rest) = if let Some(rest) = url.strip_prefix("mqtt://") {
        (false, rest)
    } else if let Some(rest) = url.strip_prefix("mqtts://") {
        (true, rest)
    } else {
        return Err(format!(
            "invalid broker URL '{url}': must start with mqtt:// or mqtts://"
        ));
    };

    let default_port = if use_tls { 8883 } else { 1883 };
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid broker port '{port}'"))?;
            (host, port)
        }
        None => (rest, default_port),
    };

    if host.is_empty() {
        return Err("broker host cannot be empty".to_string());
    }

    Ok((host.to_string(), port, use_tls))
}

/// Alert notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub enabled: bool,
    /// Recipient, e.g. a phone number.
    pub destination: Option<String>,
    /// Gateway that relays messages. Messages are only logged when unset.
    pub webhook_url: Option<String>,
    /// Place name used in the message text.
    pub location: String,
    /// Messages buffered for delivery; extra alerts are dropped.
    pub queue_capacity: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: None,
            webhook_url: None,
            location: "the facility".to_string(),
            queue_capacity: 32,
        }
    }
}

impl NotificationsConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        match &self.destination {
            Some(destination) if !destination.trim().is_empty() => {}
            _ => errors.push(ValidationError::new(
                "notifications.destination",
                "destination is required when notifications are enabled",
            )),
        }
        if let Some(url) = &self.webhook_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            errors.push(ValidationError::new(
                "notifications.webhook_url",
                format!("invalid webhook URL '{url}': must start with http:// or https://"),
            ));
        }
        if self.queue_capacity == 0 {
            errors.push(ValidationError::new(
                "notifications.queue_capacity",
                "queue capacity must be at least 1",
            ));
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Field path, e.g. `mqtt.topics.alert`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("heatwatch")
        .join("server.toml")
}
