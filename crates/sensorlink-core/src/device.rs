//! Sensor device records and the configuration commands routed to them.
//!
//! These are the shapes exchanged on the drivers bus and persisted by the
//! record store. Field names on the wire are camelCase; the legacy driver
//! names (`mac`, `switchMac`, `isConfigured`, `ID`) are accepted on input so
//! that existing sensor firmware keeps decoding.

use serde::{Deserialize, Serialize};

/// Collection (table) holding one [`DeviceRecord`] per sensor.
pub const TABLE_NAME: &str = "sensors";

/// Protocol tag stamped on records reported over the drivers bus.
pub const PROTOCOL_MQTT: &str = "MQTT";

/// Canonical persisted state of one sensor.
///
/// Apart from `identifier`, `storage_id` and `owner_id`, the reconciliation
/// logic treats every field as opaque and only compares them for equality.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Device hardware address; the natural key.
    #[serde(alias = "mac")]
    pub identifier: String,
    /// Store-assigned primary key. Empty until first persisted.
    #[serde(
        rename = "storageID",
        alias = "ID",
        alias = "id",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub storage_id: String,
    /// Address of the switch controlling this sensor.
    #[serde(rename = "ownerID", alias = "switchMac", default)]
    pub owner_id: String,
    /// Bus topic segment addressing this sensor, e.g. `sensor/7`.
    #[serde(default)]
    pub topic: String,
    #[serde(alias = "isConfigured", default)]
    pub configured: bool,
    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub group: i32,
    #[serde(default)]
    pub software_version: f32,
    #[serde(default)]
    pub hardware_version: String,
    #[serde(default)]
    pub is_ble_enabled: bool,
    #[serde(default)]
    pub temperature: i32,
    #[serde(default)]
    pub error: i32,
    #[serde(default)]
    pub reset_numbers: i32,
    #[serde(default)]
    pub initial_setup_date: f64,
    #[serde(default)]
    pub last_reset_date: f64,
    #[serde(default)]
    pub brightness: i32,
    #[serde(default)]
    pub presence: bool,
    #[serde(alias = "brigthnessCorrectionFactor", default)]
    pub brightness_correction_factor: i32,
    #[serde(alias = "thresoldPresence", default)]
    pub threshold_presence: i32,
    #[serde(default)]
    pub temperature_offset: i32,
    #[serde(alias = "brigthnessRaw", default)]
    pub brightness_raw: i32,
    #[serde(default)]
    pub last_movement: i32,
    #[serde(default)]
    pub voltage_input: i32,
    #[serde(default)]
    pub temperature_raw: i32,
    #[serde(default)]
    pub friendly_name: String,
}

impl DeviceRecord {
    /// Create a record for the given identifier with every other field defaulted.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Set the owning switch.
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    /// Set the device topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Whether the store has assigned an id to this record yet.
    pub fn is_persisted(&self) -> bool {
        !self.storage_id.is_empty()
    }
}

/// Kind of configuration command sent to a sensor.
///
/// Serialized as the `cmdType` discriminator of a [`CommandEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Setup,
    Update,
}

impl CommandKind {
    /// Topic suffix appended after the device topic on the write side.
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            CommandKind::Setup => "setup/config",
            CommandKind::Update => "update/settings",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Setup => "setup",
            CommandKind::Update => "update",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Initial setup pushed to a sensor once it is authorized.
///
/// Absent fields are left untouched on the device and are not serialized.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupCommand {
    #[serde(alias = "mac")]
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<i32>,
    #[serde(
        alias = "brigthnessCorrectionFactor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub brightness_correction_factor: Option<i32>,
    #[serde(alias = "thresoldPresence", default, skip_serializing_if = "Option::is_none")]
    pub threshold_presence: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_offset: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ble_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
}

/// Runtime settings change for a sensor. Same partial semantics as [`SetupCommand`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCommand {
    #[serde(alias = "mac")]
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<i32>,
    #[serde(
        alias = "brigthnessCorrectionFactor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub brightness_correction_factor: Option<i32>,
    #[serde(alias = "isConfigured", default, skip_serializing_if = "Option::is_none")]
    pub configured: Option<bool>,
    #[serde(alias = "thresoldPresence", default, skip_serializing_if = "Option::is_none")]
    pub threshold_presence: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_offset: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ble_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
}

/// Outbound command: the partial configuration with a `cmdType` tag next to it.
#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope<'a, T: Serialize> {
    #[serde(flatten)]
    pub command: &'a T,
    #[serde(rename = "cmdType")]
    pub cmd_type: CommandKind,
}

impl<'a, T: Serialize> CommandEnvelope<'a, T> {
    pub fn new(command: &'a T, cmd_type: CommandKind) -> Self {
        Self { command, cmd_type }
    }

    /// Dump the envelope as a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
