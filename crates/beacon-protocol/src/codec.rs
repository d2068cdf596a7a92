//! Codec for encoding and decoding Beacon messages.
//!
//! Messages travel as UTF-8 JSON text, one message per transport write.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum encoded message size (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded message exceeds the size limit.
    #[error("Message size {size} exceeds maximum {limit}")]
    MessageTooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Limit that was exceeded.
        limit: usize,
    },

    /// The value could not be represented as JSON.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not valid JSON for the requested type.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a message to JSON bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized or exceeds
/// [`MAX_MESSAGE_SIZE`].
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Bytes, ProtocolError> {
    encode_with_limit(message, MAX_MESSAGE_SIZE)
}

/// Encode a message to JSON bytes, rejecting payloads over `limit` bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized or is too large.
pub fn encode_with_limit<T: Serialize + ?Sized>(
    message: &T,
    limit: usize,
) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;

    if payload.len() > limit {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len(),
            limit,
        });
    }

    Ok(Bytes::from(payload))
}

/// Decode a message from JSON bytes.
///
/// # Errors
///
/// Returns an error if the data is too large or is not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }

    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use std::collections::HashMap;

    #[test]
    fn test_encode_is_json_text() {
        let msg = Message::new().with("type", "chat").with("body", "hi");
        let encoded = encode(&msg).unwrap();

        let text = std::str::from_utf8(&encoded).unwrap();
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["body"], "hi");
    }

    #[test]
    fn test_decode_message() {
        let msg: Message = decode(br#"{"kind":"ping","seq":3}"#).unwrap();
        assert_eq!(msg.get("kind").and_then(|v| v.as_str()), Some("ping"));
        assert_eq!(msg.get("seq").and_then(|v| v.as_u64()), Some(3));
    }

    #[test]
    fn test_unencodable_value() {
        // JSON object keys must be strings.
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple key");

        match encode(&map) {
            Err(ProtocolError::Encode(_)) => {}
            other => panic!("Expected Encode error, got {:?}", other),
        }
    }

    #[test]
    fn test_message_too_large() {
        let msg = Message::new().with("blob", "x".repeat(64));

        match encode_with_limit(&msg, 32) {
            Err(ProtocolError::MessageTooLarge { limit: 32, .. }) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid() {
        match decode::<Message>(b"[1, 2, 3]") {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }
}
