//! Configuration file parsing and structures.
//!
//! esp32d uses TOML for declarative configuration. Each entry under
//! `[devices]` describes one ESP32 controller; the table key becomes the
//! entry id that prefixes every entity unique id of that device.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::entities::Platform;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: ApiConfig,

    /// Key = entry_id
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `reqwest = "warn"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    pub fn filter(&self) -> Targets {
        self.overrides
            .iter()
            .fold(Targets::new().with_default(self.level), |targets, (target, level)| {
                targets.with_target(target.clone(), *level)
            })
    }
}

/// Daemon HTTP API
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "ApiConfig::default_listen")]
    pub listen: String,

    #[serde(default = "ApiConfig::default_port")]
    pub port: u16,
}

impl ApiConfig {
    fn default_listen() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        8565
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: Self::default_listen(),
            port: Self::default_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Which firmware the controller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    /// 3-mode controller
    Modes,
    /// NeoPixel matrix controller
    Neopixel,
}

impl DeviceKind {
    /// Entity platforms the device exposes
    pub fn platforms(self) -> &'static [Platform] {
        match self {
            DeviceKind::Modes => &[Platform::Select, Platform::Sensor, Platform::Button],
            DeviceKind::Neopixel => &[
                Platform::Light,
                Platform::Text,
                Platform::Number,
                Platform::Switch,
                Platform::Sensor,
                Platform::Button,
            ],
        }
    }

    pub fn default_scan_interval(self) -> Duration {
        match self {
            DeviceKind::Modes => Duration::from_secs(5),
            DeviceKind::Neopixel => Duration::from_secs(30),
        }
    }
}

/// One configured controller
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Hostname or IP, optionally with `:port`
    pub host: String,

    pub kind: DeviceKind,

    #[serde(default)]
    pub scan_interval_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl DeviceConfig {
    pub fn scan_interval(&self) -> Duration {
        self.scan_interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.kind.default_scan_interval())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::parse(&contents)
    }

    /// Parse and validate a TOML document
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut hosts = HashSet::new();
        for (entry_id, device) in &self.devices {
            if device.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "devices.{}: host must not be empty",
                    entry_id
                )));
            }
            if device.scan_interval_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "devices.{}: scan_interval_secs must be greater than zero",
                    entry_id
                )));
            }
            if !hosts.insert(device.host.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "devices.{}: host {} is already configured",
                    entry_id, device.host
                )));
            }
        }
        Ok(())
    }

    /// Devices that should be set up, in entry id order
    pub fn enabled_devices(&self) -> impl Iterator<Item = (&String, &DeviceConfig)> {
        self.devices.iter().filter(|(_, device)| device.enabled)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
