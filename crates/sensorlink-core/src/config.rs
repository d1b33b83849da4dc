//! Service configuration.
//!
//! The configuration file is JSON and keeps the key names used by the
//! switch services (`drivers_broker_ip`, `log_level`, ...). A handful of
//! environment variables override file values, see [`env_vars`].

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Default values.
pub mod defaults {
    pub const BROKER_HOST: &str = "localhost";
    pub const BROKER_PORT: u16 = 1883;
    pub const DATABASE_PATH: &str = "./data/sensors.redb";
    pub const LOG_LEVEL: &str = "INFO";
    pub const CLIENT_PREFIX: &str = "Sensor";
}

/// Environment variable names.
pub mod env_vars {
    pub const BROKER_HOST: &str = "SENSORLINK_BROKER_HOST";
    pub const BROKER_PORT: &str = "SENSORLINK_BROKER_PORT";
    pub const LOG_LEVEL: &str = "SENSORLINK_LOG_LEVEL";
    pub const SWITCH_MAC: &str = "SENSORLINK_SWITCH_MAC";
    pub const LOG_JSON: &str = "SENSORLINK_LOG_JSON";
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Record store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Redb,
    Memory,
}

/// Message bus backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Mqtt,
    Memory,
}

/// When the reconciler re-reads the store before writing a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Query by (identifier, owner) before every write, so a fresh process
    /// picks up the record a previous run inserted.
    #[default]
    Always,
    /// Query only when the registry already carried a storage id.
    CarriedIdOnly,
}

/// Shape of the payload forwarded for update commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateFormat {
    /// Update fields plus `cmdType: "update"`.
    #[default]
    Tagged,
    /// The decoded update fields only.
    Bare,
}

/// Log verbosity as written in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    None,
}

impl LogLevel {
    /// Parse a level name, case-insensitively. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            "NONE" | "OFF" => Some(Self::None),
            _ => None,
        }
    }

    /// Equivalent `tracing` filter directive.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
            Self::None => "off",
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Kept for compatibility with the switch configuration files; the
    /// embedded store does not connect anywhere.
    #[serde(default)]
    pub database_ip: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub database_port: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub store_backend: StoreKind,

    #[serde(default = "default_broker_host")]
    pub drivers_broker_ip: String,
    #[serde(default = "default_broker_port", deserialize_with = "string_or_number")]
    pub drivers_broker_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drivers_broker_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drivers_broker_password: Option<String>,
    #[serde(default)]
    pub bus_backend: BusKind,

    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    #[serde(default)]
    pub recovery_policy: RecoveryPolicy,
    #[serde(default)]
    pub update_format: UpdateFormat,
}

fn default_database_path() -> String {
    defaults::DATABASE_PATH.to_string()
}

fn default_broker_host() -> String {
    defaults::BROKER_HOST.to_string()
}

fn default_broker_port() -> String {
    defaults::BROKER_PORT.to_string()
}

/// Ports appear both as `"1883"` and `1883` in deployed files.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_ip: String::new(),
            database_port: String::new(),
            database_path: default_database_path(),
            store_backend: StoreKind::default(),
            drivers_broker_ip: default_broker_host(),
            drivers_broker_port: default_broker_port(),
            drivers_broker_username: None,
            drivers_broker_password: None,
            bus_backend: BusKind::default(),
            log_level: Some(defaults::LOG_LEVEL.to_string()),
            switch_mac: None,
            client_name: None,
            recovery_policy: RecoveryPolicy::default(),
            update_format: UpdateFormat::default(),
        }
    }
}

impl ServiceConfig {
    /// Read a configuration file and apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_json(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration document. A missing `log_level` becomes `INFO`.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(content)?;
        if config.log_level.is_none() {
            config.log_level = Some(defaults::LOG_LEVEL.to_string());
        }
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`ServiceConfig::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(env_vars::BROKER_HOST) {
            self.drivers_broker_ip = host;
        }
        if let Some(port) = lookup(env_vars::BROKER_PORT) {
            self.drivers_broker_port = port;
        }
        if let Some(level) = lookup(env_vars::LOG_LEVEL) {
            self.log_level = Some(level);
        }
        if let Some(mac) = lookup(env_vars::SWITCH_MAC) {
            self.switch_mac = Some(mac);
        }
    }

    /// Check values that cannot be validated by deserialization alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_port()?;
        if self.bus_backend == BusKind::Mqtt && self.drivers_broker_ip.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "drivers_broker_ip cannot be empty".to_string(),
            ));
        }
        if self.store_backend == StoreKind::Redb && self.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "database_path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Drivers broker port as a number.
    pub fn broker_port(&self) -> Result<u16, ConfigError> {
        self.drivers_broker_port.trim().parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "drivers_broker_port '{}' is not a valid port",
                self.drivers_broker_port
            ))
        })
    }

    /// Configured log level, falling back to `INFO` for unknown names.
    pub fn log_level(&self) -> LogLevel {
        self.log_level
            .as_deref()
            .and_then(LogLevel::parse)
            .unwrap_or(LogLevel::Info)
    }

    /// Identifier of the switch owning every sensor handled by this process.
    ///
    /// Upper case without separators. Falls back to the host name when no
    /// switch address is configured.
    pub fn owner_id(&self) -> String {
        match self.switch_mac.as_deref() {
            Some(mac) if !mac.trim().is_empty() => normalize_mac(mac),
            _ => normalize_mac(&local_hostname()),
        }
    }

    /// MQTT client name: configured value or `Sensor<hostname>`.
    pub fn client_name(&self) -> String {
        self.client_name
            .clone()
            .unwrap_or_else(|| format!("{}{}", defaults::CLIENT_PREFIX, local_hostname()))
    }
}

/// Normalize a hardware address: drop `:` separators and upper-case it.
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().replace(':', "").to_uppercase()
}

fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::warn!("Cannot read hostname: {}", e);
            "localhost".to_string()
        }
    }
}
