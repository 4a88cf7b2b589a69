//! Payload rules of the Data subnetwork.
//!
//! A data transaction payload is the hex encoding of a JSON object. The object may carry
//! arbitrary textual structure, but embedding binary blobs (hex or base64 encoded data, data URIs
//! or images) is rejected so that the subnetwork cannot be used as a file store.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;
use thiserror::Error;

/// Strings of hex digits longer than this are considered encoded binary. Long enough for a hash
/// or a public key reference
pub const MAX_HEX_STRING_LEN: usize = 128;

/// Strings which decode as base64 and are at least this long are considered encoded binary
pub const MIN_BASE64_BLOB_LEN: usize = 64;

/// Maximum nesting depth of the JSON document
pub const MAX_JSON_DEPTH: usize = 32;

const IMAGE_MAGICS: &[&[u8]] = &[
    b"\x89PNG\r\n\x1a\n",
    b"\xff\xd8\xff",
    b"GIF87a",
    b"GIF89a",
    b"II*\x00",
    b"MM\x00*",
    b"\x00\x00\x01\x00",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not valid hex")]
    NotHex,

    #[error("payload is not valid JSON: {0}")]
    NotJson(String),

    #[error("payload JSON is not an object")]
    NotAnObject,

    #[error("payload JSON is nested deeper than {MAX_JSON_DEPTH} levels")]
    TooDeep,

    #[error("payload contains a data URI at {0}")]
    DataUri(String),

    #[error("payload contains a hex encoded blob at {0}")]
    HexBlob(String),

    #[error("payload contains a base64 encoded blob at {0}")]
    Base64Blob(String),

    #[error("payload contains image data at {0}")]
    Image(String),
}

/// Validates the payload of a Data subnetwork transaction
pub fn validate_data_payload(payload: &[u8]) -> Result<(), PayloadError> {
    if payload.len() % 2 != 0 {
        return Err(PayloadError::NotHex);
    }
    let mut json_bytes = vec![0u8; payload.len() / 2];
    faster_hex::hex_decode(payload, &mut json_bytes).map_err(|_| PayloadError::NotHex)?;

    let value: Value = serde_json::from_slice(&json_bytes).map_err(|err| PayloadError::NotJson(err.to_string()))?;
    if !value.is_object() {
        return Err(PayloadError::NotAnObject);
    }
    check_value(&value, "$", 0)
}

fn check_value(value: &Value, path: &str, depth: usize) -> Result<(), PayloadError> {
    if depth > MAX_JSON_DEPTH {
        return Err(PayloadError::TooDeep);
    }
    match value {
        Value::String(s) => check_string(s, path),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_value(item, &format!("{path}[{i}]"), depth + 1)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, item) in map.iter() {
                let item_path = format!("{path}.{key}");
                check_string(key, &item_path)?;
                check_value(item, &item_path, depth + 1)?;
            }
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

fn check_string(s: &str, path: &str) -> Result<(), PayloadError> {
    let trimmed = s.trim();
    if trimmed.get(..5).is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:")) {
        return Err(PayloadError::DataUri(path.to_string()));
    }
    if has_image_magic(trimmed.as_bytes()) {
        return Err(PayloadError::Image(path.to_string()));
    }
    let is_hex = trimmed.bytes().all(|b| b.is_ascii_hexdigit());
    if is_hex && trimmed.len() > MAX_HEX_STRING_LEN {
        return Err(PayloadError::HexBlob(path.to_string()));
    }
    if !is_hex && trimmed.len() >= MIN_BASE64_BLOB_LEN && looks_like_base64(trimmed) {
        if let Ok(decoded) = STANDARD.decode(trimmed) {
            if has_image_magic(&decoded) {
                return Err(PayloadError::Image(path.to_string()));
            }
            return Err(PayloadError::Base64Blob(path.to_string()));
        }
    }
    Ok(())
}

fn looks_like_base64(s: &str) -> bool {
    s.len() % 4 == 0 && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

fn has_image_magic(bytes: &[u8]) -> bool {
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return true;
    }
    IMAGE_MAGICS.iter().any(|magic| bytes.len() > magic.len() && bytes.starts_with(magic))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(json: &str) -> Vec<u8> {
        faster_hex::hex_string(json.as_bytes()).into_bytes()
    }

    #[test]
    fn test_valid_payloads() {
        for json in [
            r#"{}"#,
            r#"{"app":"notes","v":1,"tags":["a","b"],"nested":{"ok":true,"n":null}}"#,
            r#"{"ref":"3b1f2e4d5c6a7980a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718"}"#,
            r#"{"text":"The quick brown fox jumps over the lazy dog, then rests for a while near the river bank."}"#,
        ] {
            assert_eq!(validate_data_payload(&encode(json)), Ok(()), "{json}");
        }
    }

    #[test]
    fn test_invalid_encodings() {
        assert_eq!(validate_data_payload(b"abc"), Err(PayloadError::NotHex));
        assert_eq!(validate_data_payload(b"zz"), Err(PayloadError::NotHex));
        assert!(matches!(validate_data_payload(&encode("{not json")), Err(PayloadError::NotJson(_))));
        assert_eq!(validate_data_payload(&encode("[1,2]")), Err(PayloadError::NotAnObject));
        assert_eq!(validate_data_payload(&encode("\"str\"")), Err(PayloadError::NotAnObject));
    }

    #[test]
    fn test_binary_blobs_are_rejected() {
        let data_uri = r#"{"img":"data:image/png;base64,AAAA"}"#;
        assert_eq!(validate_data_payload(&encode(data_uri)), Err(PayloadError::DataUri("$.img".to_string())));

        let hex_blob = format!(r#"{{"blob":"{}"}}"#, "ab".repeat(100));
        assert_eq!(validate_data_payload(&encode(&hex_blob)), Err(PayloadError::HexBlob("$.blob".to_string())));

        let b64_blob = format!(r#"{{"list":[{{"b":"{}"}}]}}"#, STANDARD.encode([7u8; 60]));
        assert_eq!(validate_data_payload(&encode(&b64_blob)), Err(PayloadError::Base64Blob("$.list[0].b".to_string())));

        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(&[0u8; 60]);
        let png_blob = format!(r#"{{"p":"{}"}}"#, STANDARD.encode(&png));
        assert_eq!(validate_data_payload(&encode(&png_blob)), Err(PayloadError::Image("$.p".to_string())));
    }

    #[test]
    fn test_depth_limit() {
        let json = format!("{}{}", r#"{"a":"#.repeat(MAX_JSON_DEPTH + 2), format!("1{}", "}".repeat(MAX_JSON_DEPTH + 2)));
        assert_eq!(validate_data_payload(&encode(&json)), Err(PayloadError::TooDeep));
    }
}
