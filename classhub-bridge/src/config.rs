//! Hub configuration.
//!
//! The file is read leniently: every account and variable field is optional
//! at the serde level, and [`HubConfig::validate`] turns the raw document into
//! validated [`Account`]s plus a list of [`ConfigIssue`]s for the entries that
//! were skipped. Only a missing file or a syntax error is fatal.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use classhub_common::topic::{DEFAULT_CLOUD_PREFIX, DEFAULT_STATUS_TOPIC, check_local_topic};
use classhub_common::{
    Direction, Format, LoggingConfig, TopicConvention, VariableType, ZenohConfig,
};

use crate::error::{ConfigIssue, Result};

/// Default wait before restarting a cloud session.
pub const CLOUD_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Default wait before reconnecting to the local bus.
pub const LOCAL_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default local bus host.
pub const DEFAULT_LOCAL_HOST: &str = "localhost";

/// Default local bus port.
pub const DEFAULT_LOCAL_PORT: u16 = 1883;

/// Configuration file as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfigFile {
    #[serde(default)]
    pub local: LocalBusConfig,

    #[serde(default)]
    pub cloud: CloudConfig,

    #[serde(default)]
    pub topics: TopicConvention,

    #[serde(default)]
    pub codec: CodecConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub accounts: Vec<RawAccount>,
}

/// Default MQTT client identifier of the hub.
pub const DEFAULT_CLIENT_ID: &str = "classhub-bridge";

/// Default MQTT keep-alive.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Protocol spoken on the local bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalTransport {
    /// MQTT broker (Mosquitto or similar).
    #[default]
    Mqtt,
    /// Zenoh router or peers.
    Zenoh,
}

/// Local bus connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBusConfig {
    #[serde(default)]
    pub transport: LocalTransport,

    #[serde(default = "default_local_host")]
    pub host: String,

    #[serde(default = "default_local_port")]
    pub port: u16,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// MQTT keep-alive in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// MQTT broker credentials.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Zenoh mode used for the local session.
    #[serde(default = "default_local_mode")]
    pub mode: String,

    #[serde(default = "default_local_retry_secs")]
    pub retry_interval_secs: u64,
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE.as_secs()
}

fn default_local_host() -> String {
    DEFAULT_LOCAL_HOST.to_string()
}

fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}

fn default_local_mode() -> String {
    "client".to_string()
}

fn default_local_retry_secs() -> u64 {
    LOCAL_RETRY_INTERVAL.as_secs()
}

impl Default for LocalBusConfig {
    fn default() -> Self {
        Self {
            transport: LocalTransport::default(),
            host: default_local_host(),
            port: default_local_port(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            username: None,
            password: None,
            mode: default_local_mode(),
            retry_interval_secs: default_local_retry_secs(),
        }
    }
}

impl LocalBusConfig {
    /// Endpoint of the local bus, `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Zenoh settings for the local session.
    pub fn zenoh(&self) -> ZenohConfig {
        ZenohConfig {
            mode: self.mode.clone(),
            ..ZenohConfig::client_to(&self.host, self.port)
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Cloud link settings shared by every account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Prefix of cloud property keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Encoding of property records.
    #[serde(default)]
    pub format: Format,

    #[serde(default = "default_cloud_retry_secs")]
    pub retry_interval_secs: u64,
}

fn default_key_prefix() -> String {
    DEFAULT_CLOUD_PREFIX.to_string()
}

fn default_cloud_retry_secs() -> u64 {
    CLOUD_RETRY_INTERVAL.as_secs()
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            zenoh: ZenohConfig::default(),
            key_prefix: default_key_prefix(),
            format: Format::default(),
            retry_interval_secs: default_cloud_retry_secs(),
        }
    }
}

impl CloudConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Payload coercion options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Accept the truthy/falsy token sets for Boolean payloads from devices.
    #[serde(default)]
    pub relaxed_booleans: bool,

    #[serde(default = "default_truthy")]
    pub truthy: Vec<String>,

    #[serde(default = "default_falsy")]
    pub falsy: Vec<String>,
}

fn default_truthy() -> Vec<String> {
    ["true", "on", "open", "lock", "locked", "1"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_falsy() -> Vec<String> {
    ["false", "off", "closed", "unlock", "unlocked", "0"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            relaxed_booleans: false,
            truthy: default_truthy(),
            falsy: default_falsy(),
        }
    }
}

/// Hub status publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,

    #[serde(default = "default_status_topic")]
    pub topic: String,
}

fn default_status_enabled() -> bool {
    true
}

fn default_status_topic() -> String {
    DEFAULT_STATUS_TOPIC.to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            topic: default_status_topic(),
        }
    }
}

/// An account entry before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAccount {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub device_id: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default)]
    pub variables: Vec<RawVariable>,
}

fn default_enabled() -> bool {
    true
}

/// A variable entry before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawVariable {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, rename = "type")]
    pub var_type: Option<String>,

    #[serde(default)]
    pub direction: Option<String>,

    #[serde(default)]
    pub topic: Option<String>,
}

/// A validated cloud account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub enabled: bool,
    pub device_id: String,
    pub secret_key: String,
    /// Variables in declaration order.
    pub variables: Vec<Variable>,
}

/// A validated variable declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub var_type: VariableType,
    pub direction: Direction,
    /// Base local topic.
    pub topic: String,
}

/// Validated hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub local: LocalBusConfig,
    pub cloud: CloudConfig,
    pub topics: TopicConvention,
    pub codec: CodecConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
    /// All accounts with a usable name, disabled ones included.
    pub accounts: Vec<Account>,
}

impl HubConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, Vec<ConfigIssue>)> {
        let file: HubConfigFile = classhub_common::load_config(path)?;
        Ok(Self::validate(file))
    }

    /// Parse and validate a configuration document.
    pub fn parse(content: &str) -> Result<(Self, Vec<ConfigIssue>)> {
        let file: HubConfigFile = json5::from_str(content)?;
        Ok(Self::validate(file))
    }

    /// Keep the valid subset of a raw configuration.
    pub fn validate(file: HubConfigFile) -> (Self, Vec<ConfigIssue>) {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        let mut accounts = Vec::new();

        for (index, raw) in file.accounts.into_iter().enumerate() {
            let name = match raw.name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => {
                    issues.push(ConfigIssue::InvalidAccount {
                        account: format!("#{}", index),
                        reason: "missing name".to_string(),
                    });
                    continue;
                }
            };

            if !seen.insert(name.clone()) {
                issues.push(ConfigIssue::InvalidAccount {
                    account: name,
                    reason: "duplicate account name".to_string(),
                });
                continue;
            }

            if let Some(account) = validate_account(name, raw, &mut issues) {
                accounts.push(account);
            }
        }

        let config = Self {
            local: file.local,
            cloud: file.cloud,
            topics: file.topics,
            codec: file.codec,
            status: file.status,
            logging: file.logging,
            accounts,
        };

        (config, issues)
    }

    /// Accounts that get a cloud session.
    pub fn enabled_accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter().filter(|a| a.enabled)
    }
}

fn validate_account(
    name: String,
    raw: RawAccount,
    issues: &mut Vec<ConfigIssue>,
) -> Option<Account> {
    let device_id = non_empty(raw.device_id);
    let secret_key = non_empty(raw.secret_key);

    if !raw.enabled {
        // Disabled accounts are kept for reporting only; their entries are not checked.
        let mut sink = Vec::new();
        let variables = validate_variables(&name, raw.variables, &mut sink);
        return Some(Account {
            name,
            enabled: false,
            device_id: device_id.unwrap_or_default(),
            secret_key: secret_key.unwrap_or_default(),
            variables,
        });
    }

    let (Some(device_id), Some(secret_key)) = (device_id, secret_key) else {
        issues.push(ConfigIssue::InvalidAccount {
            account: name,
            reason: "enabled account needs device_id and secret_key".to_string(),
        });
        return None;
    };

    let variables = validate_variables(&name, raw.variables, issues);

    Some(Account {
        name,
        enabled: true,
        device_id,
        secret_key,
        variables,
    })
}

fn validate_variables(
    account: &str,
    raw: Vec<RawVariable>,
    issues: &mut Vec<ConfigIssue>,
) -> Vec<Variable> {
    let mut names = HashSet::new();
    let mut variables = Vec::new();

    for (index, raw) in raw.into_iter().enumerate() {
        let name = non_empty(raw.name.clone());
        let reject = |reason: String| ConfigIssue::InvalidVariable {
            account: account.to_string(),
            index,
            name: name.clone(),
            reason,
        };

        match validate_variable(&raw) {
            Ok(variable) => {
                if names.insert(variable.name.clone()) {
                    variables.push(variable);
                } else {
                    issues.push(reject("duplicate variable name".to_string()));
                }
            }
            Err(reason) => issues.push(reject(reason)),
        }
    }

    variables
}

fn validate_variable(raw: &RawVariable) -> std::result::Result<Variable, String> {
    let name = non_empty(raw.name.clone()).ok_or("missing name")?;
    let topic = non_empty(raw.topic.clone()).ok_or("missing topic")?;
    let type_name = non_empty(raw.var_type.clone()).ok_or("missing type")?;
    let direction_name = non_empty(raw.direction.clone()).ok_or("missing direction")?;

    let var_type = VariableType::parse(&type_name)
        .ok_or_else(|| format!("unknown type '{}'", type_name))?;
    let direction = Direction::parse(&direction_name)
        .ok_or_else(|| format!("unknown direction '{}'", direction_name))?;
    check_local_topic(&topic)?;

    Ok(Variable {
        name,
        var_type,
        direction,
        topic,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
