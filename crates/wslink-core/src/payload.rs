//! Message payloads.
//!
//! Payloads are opaque: either raw bytes or UTF-8 text. No further
//! encoding is applied.

use crate::error::{WsError, WsResult};
use serde::{Deserialize, Serialize};

/// Message body sent or received over a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Binary(Vec<u8>),
    Text(String),
}

/// Discriminant of a [`Payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Binary,
    Text,
}

impl PayloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Text => "text",
        }
    }
}

impl Payload {
    /// Build a text payload from raw bytes, rejecting invalid UTF-8.
    ///
    /// # Errors
    ///
    /// Returns `WsError::InvalidArgument` if `bytes` is not valid UTF-8.
    pub fn text_from_utf8(bytes: Vec<u8>) -> WsResult<Self> {
        String::from_utf8(bytes)
            .map(Payload::Text)
            .map_err(|e| {
                WsError::InvalidArgument(format!("text payload is not valid UTF-8: {e}"))
            })
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Binary(_) => PayloadKind::Binary,
            Self::Text(_) => PayloadKind::Text,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(data) => data.len(),
            Self::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Binary(data) => data,
            Self::Text(text) => text.as_bytes(),
        }
    }

    /// Get the text, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(data)
    }
}

impl From<&[u8]> for Payload {
    fn from(data: &[u8]) -> Self {
        Payload::Binary(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_from_utf8_valid() {
        let payload = Payload::text_from_utf8("héllo".as_bytes().to_vec()).unwrap();
        assert_eq!(payload.as_text(), Some("héllo"));
        assert_eq!(payload.kind(), PayloadKind::Text);
    }

    #[test]
    fn test_text_from_utf8_invalid() {
        let err = Payload::text_from_utf8(vec![0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, WsError::InvalidArgument(_)));
    }

    #[test]
    fn test_len_counts_bytes() {
        assert_eq!(Payload::from("é").len(), 2);
        assert_eq!(Payload::from(vec![1u8, 2, 3]).len(), 3);
        assert!(Payload::Binary(Vec::new()).is_empty());
    }

    #[test]
    fn test_binary_has_no_text() {
        let payload = Payload::from(&b"abc"[..]);
        assert!(payload.is_binary());
        assert_eq!(payload.as_text(), None);
        assert_eq!(payload.as_bytes(), b"abc");
    }

    #[test]
    fn test_serde_tagged() {
        let json = serde_json::to_value(Payload::from("hi")).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["data"], "hi");
    }
}
