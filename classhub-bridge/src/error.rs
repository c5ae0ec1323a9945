//! Error types for the bridge.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that stop the bridge from starting.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Logging could not be initialized.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<classhub_common::Error> for BridgeError {
    fn from(err: classhub_common::Error) -> Self {
        match err {
            classhub_common::Error::ConfigNotFound(path) => Self::ConfigNotFound { path },
            classhub_common::Error::Config(msg) => Self::ConfigParse(msg),
            other => Self::Config(other.to_string()),
        }
    }
}

/// Direction of a codec operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecDirection {
    /// Local payload to cloud value.
    Decode,
    /// Cloud value to local payload.
    Encode,
}

impl std::fmt::Display for CodecDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecDirection::Decode => f.write_str("decode"),
            CodecDirection::Encode => f.write_str("encode"),
        }
    }
}

/// A payload or value that could not be converted for a variable.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Cannot {direction} {var_type} variable '{variable}' from {payload:?}: {reason}")]
pub struct CodecError {
    pub direction: CodecDirection,
    pub variable: String,
    pub var_type: classhub_common::VariableType,
    /// The offending payload (decode) or value (encode), as text.
    pub payload: String,
    pub reason: String,
}

impl CodecError {
    pub fn is_decode(&self) -> bool {
        self.direction == CodecDirection::Decode
    }

    pub fn is_encode(&self) -> bool {
        self.direction == CodecDirection::Encode
    }
}

/// Transport-level failures, reported by the bus and cloud adapters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Connecting (or reconnecting) failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The transport is not connected right now.
    #[error("Not connected")]
    NotConnected,

    /// Subscribing to a topic failed.
    #[error("Subscribe to '{topic}' failed: {message}")]
    Subscribe { topic: String, message: String },

    /// Publishing or pushing failed.
    #[error("Publish to '{key}' failed: {message}")]
    Publish { key: String, message: String },

    /// The variable was never registered with the session.
    #[error("Variable '{0}' is not registered")]
    UnknownVariable(String),

    /// The session terminated with an error.
    #[error("Session error: {0}")]
    Session(String),
}

impl TransportError {
    pub fn publish(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Publish {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

/// Why a single routed message was not delivered.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A configuration entry that was skipped.
///
/// Issues never stop the bridge; the valid subset of the configuration is served.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// An account was rejected as a whole.
    #[error("Account '{account}' skipped: {reason}")]
    InvalidAccount { account: String, reason: String },

    /// A variable failed validation.
    #[error("Variable #{index} of account '{account}' skipped: {reason}")]
    InvalidVariable {
        account: String,
        /// Position in the account's variable list.
        index: usize,
        /// Variable name when one was given.
        name: Option<String>,
        reason: String,
    },

    /// A second write binding for the same (account, variable) pair.
    #[error("Duplicate write binding for '{account}.{variable}' on '{topic}' dropped")]
    DuplicateBinding {
        account: String,
        variable: String,
        topic: String,
    },
}
