//! Topic and key expression builders.
//!
//! Local bus topics follow the room convention:
//!
//! ```text
//! <base>              TO_CLOUD status
//! <base>/status       BIDIRECTIONAL status
//! <base>/command      FROM_CLOUD and BIDIRECTIONAL commands
//! ```
//!
//! Cloud keys are scoped by device identity:
//!
//! ```text
//! <prefix>/<device_id>/<variable>        property updates
//! <prefix>/<device_id>/<variable>/set    writes from the cloud
//! ```

use serde::{Deserialize, Serialize};

/// Default status suffix for bidirectional variables.
pub const DEFAULT_STATUS_SUFFIX: &str = "/status";

/// Default command suffix for cloud-to-device commands.
pub const DEFAULT_COMMAND_SUFFIX: &str = "/command";

/// Default key prefix on the cloud link.
pub const DEFAULT_CLOUD_PREFIX: &str = "iot";

/// Default topic for hub status records.
pub const DEFAULT_STATUS_TOPIC: &str = "classhub/@/status";

/// Suffixes that separate status and command flows sharing a base topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConvention {
    /// Appended to the base topic of BIDIRECTIONAL variables for status.
    #[serde(default = "default_status_suffix")]
    pub status_suffix: String,

    /// Appended to the base topic of FROM_CLOUD/BIDIRECTIONAL variables for commands.
    #[serde(default = "default_command_suffix")]
    pub command_suffix: String,
}

fn default_status_suffix() -> String {
    DEFAULT_STATUS_SUFFIX.to_string()
}

fn default_command_suffix() -> String {
    DEFAULT_COMMAND_SUFFIX.to_string()
}

impl Default for TopicConvention {
    fn default() -> Self {
        Self {
            status_suffix: default_status_suffix(),
            command_suffix: default_command_suffix(),
        }
    }
}

impl TopicConvention {
    /// Status topic of a bidirectional variable.
    ///
    /// # Example
    /// ```
    /// use classhub_common::topic::TopicConvention;
    ///
    /// let topics = TopicConvention::default();
    /// assert_eq!(topics.status_topic("classroom/curtain"), "classroom/curtain/status");
    /// ```
    pub fn status_topic(&self, base: &str) -> String {
        join_suffix(base, &self.status_suffix)
    }

    /// Command topic of a variable written by the cloud.
    ///
    /// # Example
    /// ```
    /// use classhub_common::topic::TopicConvention;
    ///
    /// let topics = TopicConvention::default();
    /// assert_eq!(topics.command_topic("classroom/lighting"), "classroom/lighting/command");
    /// ```
    pub fn command_topic(&self, base: &str) -> String {
        join_suffix(base, &self.command_suffix)
    }
}

/// Append a suffix to a base topic without doubling the separator.
fn join_suffix(base: &str, suffix: &str) -> String {
    let suffix = suffix.trim_start_matches('/');
    if suffix.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), suffix)
}

/// Characters a local topic may not contain.
///
/// Covers MQTT wildcards and the characters Zenoh reserves in key expressions.
const RESERVED_TOPIC_CHARS: &[char] = &['#', '+', '*', '?', '$', '\0'];

/// Check that a local topic names exactly one topic on every supported bus.
///
/// # Example
/// ```
/// use classhub_common::topic::check_local_topic;
///
/// assert!(check_local_topic("classroom/curtain").is_ok());
/// assert!(check_local_topic("classroom/room#1").is_err());
/// ```
pub fn check_local_topic(topic: &str) -> Result<(), String> {
    if let Some(c) = topic.chars().find(|c| RESERVED_TOPIC_CHARS.contains(c)) {
        return Err(format!("topic '{}' contains reserved character {:?}", topic, c));
    }
    if topic.split('/').any(str::is_empty) {
        return Err(format!("topic '{}' has an empty level", topic));
    }
    Ok(())
}

/// Key of a cloud property.
pub fn cloud_property_key(prefix: &str, device_id: &str, variable: &str) -> String {
    format!("{}/{}/{}", prefix, device_id, variable)
}

/// Key on which the cloud writes a property.
pub fn cloud_write_key(prefix: &str, device_id: &str, variable: &str) -> String {
    format!("{}/{}/{}/set", prefix, device_id, variable)
}

/// Wildcard matching every write addressed to a device.
pub fn cloud_write_wildcard(prefix: &str, device_id: &str) -> String {
    format!("{}/{}/*/set", prefix, device_id)
}

/// Extract the variable name from a write key, if it belongs to the device.
pub fn parse_cloud_write_key<'a>(
    key: &'a str,
    prefix: &str,
    device_id: &str,
) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    let rest = rest.strip_prefix(device_id)?.strip_prefix('/')?;
    let variable = rest.strip_suffix("/set")?;
    if variable.is_empty() || variable.contains('/') {
        return None;
    }
    Some(variable)
}
