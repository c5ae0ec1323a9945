//! Cloud variable types and typed values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared type of a cloud variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VariableType {
    String,
    Integer,
    Float,
    Boolean,
    Dimmed,
    Color,
}

impl VariableType {
    pub const ALL: [VariableType; 6] = [
        VariableType::String,
        VariableType::Integer,
        VariableType::Float,
        VariableType::Boolean,
        VariableType::Dimmed,
        VariableType::Color,
    ];

    /// Name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableType::String => "String",
            VariableType::Integer => "Integer",
            VariableType::Float => "Float",
            VariableType::Boolean => "Boolean",
            VariableType::Dimmed => "Dimmed",
            VariableType::Color => "Color",
        }
    }

    /// Parse a configured type name (ASCII case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a variable's data flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Device status relayed to the cloud.
    ToCloud,
    /// Cloud commands relayed to the device.
    FromCloud,
    /// Both.
    Bidirectional,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToCloud => "TO_CLOUD",
            Direction::FromCloud => "FROM_CLOUD",
            Direction::Bidirectional => "BIDIRECTIONAL",
        }
    }

    /// Parse a configured direction (ASCII case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        [Direction::ToCloud, Direction::FromCloud, Direction::Bidirectional]
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Local messages are relayed to the cloud.
    pub fn sends_to_cloud(&self) -> bool {
        matches!(self, Direction::ToCloud | Direction::Bidirectional)
    }

    /// Cloud writes are relayed to the local bus.
    pub fn receives_from_cloud(&self) -> bool {
        matches!(self, Direction::FromCloud | Direction::Bidirectional)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dimmable light: on/off plus brightness (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimmed {
    #[serde(rename = "swi")]
    pub switch: bool,
    #[serde(rename = "bri")]
    pub brightness: u8,
}

/// A color light in HSV: brightness and saturation 0-100, hue 0-360.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    #[serde(rename = "swi")]
    pub switch: bool,
    #[serde(rename = "bri")]
    pub brightness: u8,
    pub hue: u16,
    #[serde(rename = "sat")]
    pub saturation: u8,
}

pub const MAX_BRIGHTNESS: i64 = 100;
pub const MAX_HUE: i64 = 360;
pub const MAX_SATURATION: i64 = 100;

/// A value exchanged with a cloud variable.
///
/// `Object` carries a structured Dimmed/Color value exactly as the cloud
/// delivered it, before field validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CloudValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Dimmed(Dimmed),
    Color(Color),
    Object(Map<String, Value>),
}

impl CloudValue {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            CloudValue::Text(_) => "text",
            CloudValue::Integer(_) => "integer",
            CloudValue::Float(_) => "float",
            CloudValue::Boolean(_) => "boolean",
            CloudValue::Dimmed(_) => "dimmed",
            CloudValue::Color(_) => "color",
            CloudValue::Object(_) => "object",
        }
    }

    /// Convert a JSON value received from the cloud into the variable's type.
    ///
    /// Scalars are converted to their typed variant. Dimmed and Color values
    /// stay as raw objects; field validation happens when they are encoded.
    pub fn from_json(var_type: VariableType, value: &Value) -> Option<Self> {
        match (var_type, value) {
            (VariableType::String, Value::String(s)) => Some(CloudValue::Text(s.clone())),
            (VariableType::String, Value::Number(n)) => Some(CloudValue::Text(n.to_string())),
            (VariableType::String, Value::Bool(b)) => Some(CloudValue::Text(b.to_string())),
            (VariableType::Integer, Value::Number(n)) => match n.as_i64() {
                Some(i) => Some(CloudValue::Integer(i)),
                None => n
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| CloudValue::Integer(f as i64)),
            },
            (VariableType::Float, Value::Number(n)) => n.as_f64().map(CloudValue::Float),
            (VariableType::Boolean, Value::Bool(b)) => Some(CloudValue::Boolean(*b)),
            (VariableType::Dimmed | VariableType::Color, Value::Object(map)) => {
                Some(CloudValue::Object(map.clone()))
            }
            _ => None,
        }
    }
}

impl From<bool> for CloudValue {
    fn from(v: bool) -> Self {
        CloudValue::Boolean(v)
    }
}

impl From<i64> for CloudValue {
    fn from(v: i64) -> Self {
        CloudValue::Integer(v)
    }
}

impl From<f64> for CloudValue {
    fn from(v: f64) -> Self {
        CloudValue::Float(v)
    }
}

impl From<&str> for CloudValue {
    fn from(v: &str) -> Self {
        CloudValue::Text(v.to_string())
    }
}

impl From<Dimmed> for CloudValue {
    fn from(v: Dimmed) -> Self {
        CloudValue::Dimmed(v)
    }
}

impl From<Color> for CloudValue {
    fn from(v: Color) -> Self {
        CloudValue::Color(v)
    }
}

impl std::fmt::Display for CloudValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudValue::Text(s) => write!(f, "{:?}", s),
            CloudValue::Integer(i) => write!(f, "{}", i),
            CloudValue::Float(x) => write!(f, "{}", x),
            CloudValue::Boolean(b) => write!(f, "{}", b),
            CloudValue::Dimmed(d) => write!(f, "dimmed(on={}, bri={})", d.switch, d.brightness),
            CloudValue::Color(c) => write!(
                f,
                "color(on={}, bri={}, hue={}, sat={})",
                c.switch, c.brightness, c.hue, c.saturation
            ),
            CloudValue::Object(map) => write!(f, "{}", Value::Object(map.clone())),
        }
    }
}
