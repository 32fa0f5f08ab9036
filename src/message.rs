//! Message model.

use std::collections::HashMap;

/// Message headers: string keys to string values, iteration order irrelevant.
pub type Properties = HashMap<String, String>;

/// A message flowing through the runtime.
///
/// Messages are value objects: freely cloned, never shared mutably. The
/// subject may be empty when the source does not know the destination; the
/// router assigns one. Property keys must not be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Partitioning hint; may be empty.
    pub key: Vec<u8>,
    /// Logical destination, mapped 1:1 to a Kafka topic by the Kafka sink.
    pub subject: String,
    /// Headers attached to the message.
    pub properties: Properties,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// A message with only a subject and payload.
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: Vec::new(),
            subject: subject.into(),
            properties: Properties::new(),
            payload,
        }
    }

    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = key;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builders() {
        let msg = Message::new("dev-test", b"payload".to_vec())
            .with_key(b"key".to_vec())
            .with_property("type", "heartbeat");

        assert_eq!(msg.subject, "dev-test");
        assert_eq!(msg.key, b"key");
        assert_eq!(msg.payload, b"payload");
        assert_eq!(msg.properties.get("type").map(String::as_str), Some("heartbeat"));
    }

    #[test]
    fn test_message_is_a_value_object() {
        let msg = Message::new("a", vec![1, 2, 3]);
        let copy = msg.clone();
        assert_eq!(msg, copy);
    }
}
