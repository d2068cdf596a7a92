//! Message values pushed to clients.
//!
//! A message is a JSON object: a mapping of string keys to arbitrary values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured message for delivery to a single client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Create an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field to the message.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a field, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Get a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of top-level fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the message has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the message, returning the underlying object.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Message {
    type Error = Value;

    /// Convert a JSON value, handing it back unchanged if it is not an object.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_builder() {
        let msg = Message::new().with("type", "notice").with("count", 2);
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.get("count"), Some(&json!(2)));
    }

    #[test]
    fn test_message_from_value() {
        assert!(Message::try_from(json!({"a": 1})).is_ok());
        assert_eq!(Message::try_from(json!("text")), Err(json!("text")));
    }
}
