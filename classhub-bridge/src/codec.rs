//! Conversion between device payloads and typed cloud values.
//!
//! Devices speak plain text for scalars and JSON objects for lights:
//!
//! | Type    | Device payload                                   |
//! |---------|--------------------------------------------------|
//! | String  | UTF-8 text, unchanged                            |
//! | Integer | decimal text (`"42"`)                            |
//! | Float   | decimal text (`"21.5"`)                          |
//! | Boolean | `true`/`false`, or `LOCK`/`UNLOCK` for latches   |
//! | Dimmed  | `{"bri":80,"swi":true}`                          |
//! | Color   | `{"bri":80,"hue":200,"sat":50,"swi":true}`       |
//!
//! Structured fields are read under their long or short names. Every failure
//! is a [`CodecError`]; nothing in here panics.

use serde_json::{Map, Value};

use classhub_common::value::{MAX_BRIGHTNESS, MAX_HUE, MAX_SATURATION};
use classhub_common::{CloudValue, Color, Dimmed, VariableType};

use crate::config::CodecConfig;
use crate::error::{CodecDirection, CodecError};

/// Brightness assumed when a device omits it.
pub const DEFAULT_BRIGHTNESS: u8 = 100;

/// Payload codec.
#[derive(Debug, Clone)]
pub struct Codec {
    relaxed_booleans: bool,
    truthy: Vec<String>,
    falsy: Vec<String>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(&CodecConfig::default())
    }
}

impl Codec {
    pub fn new(config: &CodecConfig) -> Self {
        let lower = |tokens: &[String]| -> Vec<String> {
            tokens.iter().map(|t| t.trim().to_ascii_lowercase()).collect()
        };
        Self {
            relaxed_booleans: config.relaxed_booleans,
            truthy: lower(&config.truthy),
            falsy: lower(&config.falsy),
        }
    }

    /// Decode a device payload into a value of the variable's type.
    pub fn decode(
        &self,
        variable: &str,
        var_type: VariableType,
        payload: &[u8],
    ) -> Result<CloudValue, CodecError> {
        let fail = |reason: String| CodecError {
            direction: CodecDirection::Decode,
            variable: variable.to_string(),
            var_type,
            payload: String::from_utf8_lossy(payload).into_owned(),
            reason,
        };

        let text = std::str::from_utf8(payload).map_err(|e| fail(format!("not UTF-8: {}", e)))?;

        match var_type {
            VariableType::String => Ok(CloudValue::Text(text.to_string())),
            VariableType::Integer => text
                .trim()
                .parse::<i64>()
                .map(CloudValue::Integer)
                .map_err(|e| fail(format!("not an integer: {}", e))),
            VariableType::Float => {
                let value = text
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| fail(format!("not a number: {}", e)))?;
                if !value.is_finite() {
                    return Err(fail("not a finite number".to_string()));
                }
                Ok(CloudValue::Float(value))
            }
            VariableType::Boolean => self
                .decode_bool(text)
                .map(CloudValue::Boolean)
                .ok_or_else(|| fail("not a boolean".to_string())),
            VariableType::Dimmed => {
                let map = parse_object(text).map_err(fail)?;
                dimmed_from(&map, Some(DEFAULT_BRIGHTNESS))
                    .map(CloudValue::Dimmed)
                    .map_err(fail)
            }
            VariableType::Color => {
                let map = parse_object(text).map_err(fail)?;
                color_from(&map, Some(DEFAULT_BRIGHTNESS))
                    .map(CloudValue::Color)
                    .map_err(fail)
            }
        }
    }

    /// Encode a cloud value into the payload the device expects.
    ///
    /// Structured values may arrive typed or as raw objects; raw objects must
    /// carry every field.
    pub fn encode(
        &self,
        variable: &str,
        var_type: VariableType,
        value: &CloudValue,
    ) -> Result<String, CodecError> {
        let fail = |reason: String| CodecError {
            direction: CodecDirection::Encode,
            variable: variable.to_string(),
            var_type,
            payload: value.to_string(),
            reason,
        };
        let mismatch = || fail(format!("unexpected {} value", value.kind()));

        match (var_type, value) {
            (VariableType::String, CloudValue::Text(s)) => Ok(s.clone()),
            (VariableType::Integer, CloudValue::Integer(i)) => Ok(i.to_string()),
            (VariableType::Integer, CloudValue::Float(f)) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Ok((*f as i64).to_string())
                } else {
                    Err(fail("not an integer in range".to_string()))
                }
            }
            (VariableType::Float, CloudValue::Float(f)) => {
                if f.is_finite() {
                    Ok(f.to_string())
                } else {
                    Err(fail("not a finite number".to_string()))
                }
            }
            (VariableType::Float, CloudValue::Integer(i)) => Ok((*i as f64).to_string()),
            (VariableType::Boolean, CloudValue::Boolean(b)) => Ok(encode_bool(variable, *b)),
            (VariableType::Dimmed, CloudValue::Dimmed(d)) => {
                check_dimmed(d).map_err(fail)?;
                Ok(dimmed_payload(d))
            }
            (VariableType::Dimmed, CloudValue::Object(map)) => dimmed_from(map, None)
                .map(|d| dimmed_payload(&d))
                .map_err(fail),
            (VariableType::Color, CloudValue::Color(c)) => {
                check_color(c).map_err(fail)?;
                Ok(color_payload(c))
            }
            (VariableType::Color, CloudValue::Object(map)) => color_from(map, None)
                .map(|c| color_payload(&c))
                .map_err(fail),
            _ => Err(mismatch()),
        }
    }

    fn decode_bool(&self, text: &str) -> Option<bool> {
        let token = text.trim().to_ascii_lowercase();
        match token.as_str() {
            "true" => return Some(true),
            "false" => return Some(false),
            _ => {}
        }
        if !self.relaxed_booleans {
            return None;
        }
        if self.truthy.contains(&token) {
            Some(true)
        } else if self.falsy.contains(&token) {
            Some(false)
        } else {
            None
        }
    }
}

/// Whether a Boolean variable drives a lock or latch.
pub fn is_latch(variable: &str) -> bool {
    let name = variable.to_ascii_lowercase();
    name.contains("lock") || name.contains("latch")
}

fn encode_bool(variable: &str, value: bool) -> String {
    let token = match (is_latch(variable), value) {
        (true, true) => "LOCK",
        (true, false) => "UNLOCK",
        (false, true) => "true",
        (false, false) => "false",
    };
    token.to_string()
}

fn parse_object(text: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", other)),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

/// Look up a field by long or short name; `null` counts as absent.
fn field<'a>(map: &'a Map<String, Value>, long: &str, short: &str) -> Option<&'a Value> {
    map.get(long)
        .or_else(|| map.get(short))
        .filter(|v| !v.is_null())
}

fn read_switch(map: &Map<String, Value>) -> Result<bool, String> {
    let value = field(map, "switch", "swi").ok_or("missing switch")?;
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" => Ok(true),
            "false" | "off" => Ok(false),
            _ => Err(format!("invalid switch {:?}", s)),
        },
        other => Err(format!("invalid switch {}", other)),
    }
}

fn read_level(
    map: &Map<String, Value>,
    long: &str,
    short: &str,
    max: i64,
    default: Option<i64>,
) -> Result<i64, String> {
    let level = match field(map, long, short) {
        None => default.ok_or_else(|| format!("missing {}", long))?,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i,
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() <= max as f64)
                .map(|f| f as i64)
                .ok_or_else(|| format!("{} must be a whole number, got {}", long, n))?,
        },
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("{} must be a whole number, got {:?}", long, s))?,
        Some(other) => return Err(format!("{} must be a number, got {}", long, other)),
    };

    if !(0..=max).contains(&level) {
        return Err(format!("{} {} out of range 0-{}", long, level, max));
    }
    Ok(level)
}

fn dimmed_from(map: &Map<String, Value>, default_brightness: Option<u8>) -> Result<Dimmed, String> {
    let switch = read_switch(map)?;
    let brightness = read_level(
        map,
        "brightness",
        "bri",
        MAX_BRIGHTNESS,
        default_brightness.map(i64::from),
    )?;
    Ok(Dimmed {
        switch,
        brightness: brightness as u8,
    })
}

fn color_from(map: &Map<String, Value>, default_brightness: Option<u8>) -> Result<Color, String> {
    let switch = read_switch(map)?;
    let brightness = read_level(
        map,
        "brightness",
        "bri",
        MAX_BRIGHTNESS,
        default_brightness.map(i64::from),
    )?;
    let hue = read_level(map, "hue", "hue", MAX_HUE, None)?;
    let saturation = read_level(map, "saturation", "sat", MAX_SATURATION, None)?;
    Ok(Color {
        switch,
        brightness: brightness as u8,
        hue: hue as u16,
        saturation: saturation as u8,
    })
}

fn check_dimmed(d: &Dimmed) -> Result<(), String> {
    if i64::from(d.brightness) > MAX_BRIGHTNESS {
        return Err(format!("brightness {} out of range 0-{}", d.brightness, MAX_BRIGHTNESS));
    }
    Ok(())
}

fn check_color(c: &Color) -> Result<(), String> {
    if i64::from(c.brightness) > MAX_BRIGHTNESS {
        return Err(format!("brightness {} out of range 0-{}", c.brightness, MAX_BRIGHTNESS));
    }
    if i64::from(c.hue) > MAX_HUE {
        return Err(format!("hue {} out of range 0-{}", c.hue, MAX_HUE));
    }
    if i64::from(c.saturation) > MAX_SATURATION {
        return Err(format!("saturation {} out of range 0-{}", c.saturation, MAX_SATURATION));
    }
    Ok(())
}

// Keys are written in sorted order so devices and tests see a stable payload.
fn dimmed_payload(d: &Dimmed) -> String {
    format!(r#"{{"bri":{},"swi":{}}}"#, d.brightness, d.switch)
}

fn color_payload(c: &Color) -> String {
    format!(
        r#"{{"bri":{},"hue":{},"sat":{},"swi":{}}}"#,
        c.brightness, c.hue, c.saturation, c.switch
    )
}
