//! Drivers bus topics.
//!
//! Sensors report on `/read/sensor/<n>/...`; commands for a sensor go to
//! `/write/<device topic>/<suffix>` where the device topic is the
//! `sensor/<n>` segment learned from its status reports.

use sensorlink_core::CommandKind;

/// Sensor announcing itself.
pub const HELLO_TOPIC: &str = "/read/sensor/+/setup/hello";

/// Periodic sensor status dump.
pub const STATUS_TOPIC: &str = "/read/sensor/+/status/dump";

/// Operator setup request, addressed to the switch.
pub const SETUP_COMMAND_TOPIC: &str = "/write/switch/sensor/setup/config";

/// Operator settings update, addressed to the switch.
pub const UPDATE_COMMAND_TOPIC: &str = "/write/switch/sensor/update/settings";

/// Prefix of every outbound command topic.
pub const WRITE_PREFIX: &str = "/write/";

/// Match a topic against a subscription pattern with MQTT `+` and `#` wildcards.
pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            // Multi-level wildcard matches the parent level and everything below
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Device topic carried by a status topic: its third and fourth
/// `/`-separated segments, the empty segment before the leading `/` being
/// the first.
///
/// `/read/sensor/7/status/dump` gives `sensor/7`. Returns `None` when the
/// topic is too short or either segment is empty.
pub fn device_topic_from_status(topic: &str) -> Option<String> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 5 {
        return None;
    }
    let (kind, index) = (parts[2], parts[3]);
    if kind.is_empty() || index.is_empty() {
        return None;
    }
    Some(format!("{}/{}", kind, index))
}

/// Outbound topic for a command to the given device topic.
pub fn command_topic(device_topic: &str, kind: CommandKind) -> String {
    format!(
        "{}{}/{}",
        WRITE_PREFIX,
        device_topic.trim_matches('/'),
        kind.topic_suffix()
    )
}
