//! Key and value encodings.
//!
//! The substrate stores raw bytes. Callers that prefer strings or JSON
//! documents go through an [`Encoding`], configured per engine for keys and
//! values separately.

use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Binary,
    Utf8,
    Json,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Utf8 => "utf8",
            Encoding::Json => "json",
        }
    }

    pub fn encode(&self, datum: &Datum) -> Result<Vec<u8>> {
        match (self, datum) {
            (Encoding::Binary, Datum::Bytes(bytes)) => Ok(bytes.clone()),
            (Encoding::Binary | Encoding::Utf8, Datum::Text(text)) => Ok(text.as_bytes().to_vec()),
            (Encoding::Binary, Datum::Json(value)) => Ok(serde_json::to_vec(value)?),

            (Encoding::Utf8, Datum::Bytes(bytes)) => std::str::from_utf8(bytes)
                .map(|text| text.as_bytes().to_vec())
                .map_err(|e| DbError::Encoding(format!("invalid utf8: {}", e))),
            (Encoding::Utf8, Datum::Json(value)) => Ok(value.to_string().into_bytes()),

            (Encoding::Json, Datum::Json(value)) => Ok(serde_json::to_vec(value)?),
            (Encoding::Json, Datum::Text(text)) => Ok(serde_json::to_vec(text)?),
            (Encoding::Json, Datum::Bytes(_)) => Err(DbError::Encoding(
                "raw bytes cannot be stored with the json encoding".into(),
            )),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Datum> {
        match self {
            Encoding::Binary => Ok(Datum::Bytes(bytes.to_vec())),
            Encoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map(Datum::Text)
                .map_err(|e| DbError::Encoding(format!("invalid utf8: {}", e))),
            Encoding::Json => Ok(Datum::Json(serde_json::from_slice(bytes)?)),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A key or value before encoding / after decoding
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl Datum {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Datum::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Datum::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Datum::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::Text(value.to_string())
    }
}

impl From<String> for Datum {
    fn from(value: String) -> Self {
        Datum::Text(value)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(value: Vec<u8>) -> Self {
        Datum::Bytes(value)
    }
}

impl From<&[u8]> for Datum {
    fn from(value: &[u8]) -> Self {
        Datum::Bytes(value.to_vec())
    }
}

impl From<serde_json::Value> for Datum {
    fn from(value: serde_json::Value) -> Self {
        Datum::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_utf8_rejects_invalid_bytes() {
        let result = Encoding::Utf8.encode(&Datum::Bytes(vec![0xff, 0xfe]));
        assert!(matches!(result, Err(DbError::Encoding(_))));

        let result = Encoding::Utf8.decode(&[0xc3, 0x28]);
        assert!(matches!(result, Err(DbError::Encoding(_))));
    }

    #[test]
    fn test_json_document() {
        let doc = json!({ "name": "alice", "tags": ["a", "b"] });
        let bytes = Encoding::Json.encode(&Datum::from(doc.clone())).unwrap();
        assert_eq!(Encoding::Json.decode(&bytes).unwrap(), Datum::Json(doc));
    }

    #[test]
    fn test_json_text_is_quoted() {
        let bytes = Encoding::Json.encode(&Datum::from("hi")).unwrap();
        assert_eq!(bytes, b"\"hi\"");
    }

    #[test]
    fn test_json_rejects_raw_bytes() {
        assert!(Encoding::Json.encode(&Datum::Bytes(vec![1, 2])).is_err());
    }

    #[test]
    fn test_binary_keeps_bytes() {
        let bytes = Encoding::Binary.encode(&Datum::from(&[0u8, 1, 255][..])).unwrap();
        assert_eq!(bytes, vec![0, 1, 255]);
        assert_eq!(
            Encoding::Binary.decode(&bytes).unwrap().as_bytes(),
            Some(&[0u8, 1, 255][..])
        );
    }

    #[test]
    fn test_serde_names() {
        let encoded = serde_json::to_string(&Encoding::Utf8).unwrap();
        assert_eq!(encoded, "\"utf8\"");
    }
}
