//! Payload decoding and encoding at the bus boundary
//!
//! Raw bytes are turned into a [`Payload`] exactly once, when they leave the
//! transport. Text that is bracketed by `{` and `}` is decoded as JSON; any
//! other text, and any bracketed text that fails to parse, stays an opaque
//! string.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Payload errors
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("expected a structured payload, got text: {0}")]
    NotStructured(String),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid status value: {0}")]
    InvalidStatus(String),
}

/// Result type for payload operations
pub type PayloadResult<T> = Result<T, PayloadError>;

/// A decoded bus payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Opaque text, published verbatim
    Text(String),
    /// A structured document, published as JSON
    Structured(serde_json::Value),
}

impl Payload {
    /// Decode raw bytes received from the bus
    ///
    /// Never fails: malformed bracketed text downgrades to [`Payload::Text`].
    pub fn decode(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes).into_owned();

        if text.starts_with('{') && text.ends_with('}') {
            match serde_json::from_str(&text) {
                Ok(value) => return Payload::Structured(value),
                Err(e) => {
                    debug!(error = %e, "Bracketed payload is not valid JSON, keeping text");
                }
            }
        }

        Payload::Text(text)
    }

    /// Encode for publishing
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Structured(value) => value.to_string().into_bytes(),
        }
    }

    /// Get the text if this is a text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Structured(_) => None,
        }
    }

    /// Get the document if this is a structured payload
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Text(_) => None,
            Payload::Structured(value) => Some(value),
        }
    }

    /// Deserialize a structured payload into a typed value
    pub fn parse<T: DeserializeOwned>(&self) -> PayloadResult<T> {
        match self {
            Payload::Structured(value) => Ok(serde_json::from_value(value.clone())?),
            Payload::Text(text) => Err(PayloadError::NotStructured(text.clone())),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Payload::Text(s),
            other => Payload::Structured(other),
        }
    }
}

impl From<u32> for Payload {
    fn from(n: u32) -> Self {
        Payload::Structured(n.into())
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Text(text) => write!(f, "{}", text),
            Payload::Structured(value) => write!(f, "{}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_plain_text() {
        assert_eq!(Payload::decode(b"ON"), Payload::Text("ON".to_string()));
    }

    #[test]
    fn test_decode_structured() {
        let payload = Payload::decode(br#"{"occupancy":true,"illuminance":4}"#);
        assert_eq!(
            payload,
            Payload::Structured(json!({"occupancy": true, "illuminance": 4}))
        );
    }

    #[test]
    fn test_decode_malformed_bracketed_text_fails_open() {
        let payload = Payload::decode(b"{not json}");
        assert_eq!(payload, Payload::Text("{not json}".to_string()));
    }

    #[test]
    fn test_decode_json_array_stays_text() {
        // Only `{...}` is considered structured
        let payload = Payload::decode(b"[1,2,3]");
        assert_eq!(payload.as_text(), Some("[1,2,3]"));
    }

    #[test]
    fn test_decode_leading_whitespace_stays_text() {
        let payload = Payload::decode(br#" {"a":1}"#);
        assert!(payload.as_text().is_some());
    }

    #[test]
    fn test_encode_text_verbatim() {
        assert_eq!(Payload::from("TOGGLE").encode(), b"TOGGLE".to_vec());
    }

    #[test]
    fn test_encode_non_string_as_json() {
        assert_eq!(Payload::from(240).encode(), b"240".to_vec());
        assert_eq!(
            Payload::from(json!({"state": "ON"})).encode(),
            br#"{"state":"ON"}"#.to_vec()
        );
    }

    #[test]
    fn test_json_string_becomes_text() {
        assert_eq!(Payload::from(json!("OFF")), Payload::Text("OFF".to_string()));
    }

    #[test]
    fn test_parse_typed() {
        #[derive(Deserialize)]
        struct Click {
            click: String,
        }

        let payload = Payload::decode(br#"{"click":"double","battery":90}"#);
        let click: Click = payload.parse().unwrap();
        assert_eq!(click.click, "double");

        assert!(matches!(
            Payload::from("single").parse::<Click>(),
            Err(PayloadError::NotStructured(_))
        ));
    }

    #[test]
    fn test_deserialize_config_values() {
        let text: Payload = serde_json::from_value(json!("ON")).unwrap();
        let number: Payload = serde_json::from_value(json!(240)).unwrap();
        assert_eq!(text, Payload::Text("ON".to_string()));
        assert_eq!(number, Payload::Structured(json!(240)));
    }
}
