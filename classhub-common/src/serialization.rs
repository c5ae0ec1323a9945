use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Encoding used for records exchanged with the cloud.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON (human-readable, convenient when debugging a cloud endpoint).
    Json,

    /// CBOR (compact binary, the default on the cloud link).
    #[default]
    Cbor,
}

impl Format {
    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Cbor => "application/cbor",
        }
    }
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

/// Guess the format of a record.
///
/// Returns `Json` if the data starts with `{` or `[`, otherwise `Cbor`.
pub fn detect_format(data: &[u8]) -> Format {
    match data.first() {
        Some(b'{') | Some(b'[') => Format::Json,
        _ => Format::Cbor,
    }
}

/// Decode bytes, auto-detecting the format.
pub fn decode_auto<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    decode(data, detect_format(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        n: String,
        v: serde_json::Value,
    }

    fn record() -> Record {
        Record {
            n: "temperature".to_string(),
            v: serde_json::json!(21.5),
        }
    }

    #[test]
    fn test_cbor_record_decodes_as_json_value() {
        let encoded = encode(&record(), Format::Cbor).unwrap();
        let value: serde_json::Value = decode(&encoded, Format::Cbor).unwrap();
        assert_eq!(value["n"], "temperature");
        assert_eq!(value["v"], 21.5);
    }

    #[test]
    fn test_cbor_is_smaller() {
        let json = encode(&record(), Format::Json).unwrap();
        let cbor = encode(&record(), Format::Cbor).unwrap();
        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(detect_format(b"{\"n\": \"x\"}"), Format::Json);
        assert_eq!(detect_format(b"[1, 2]"), Format::Json);
        assert_eq!(detect_format(b"\xa2\x61n\x61x"), Format::Cbor);
    }

    #[test]
    fn test_auto_decode() {
        let json = encode(&record(), Format::Json).unwrap();
        let cbor = encode(&record(), Format::Cbor).unwrap();
        assert_eq!(decode_auto::<Record>(&json).unwrap(), record());
        assert_eq!(decode_auto::<Record>(&cbor).unwrap(), record());
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(decode::<Record>(b"not a record", Format::Json).is_err());
        assert!(decode::<Record>(&[0xff, 0x00], Format::Cbor).is_err());
    }
}
