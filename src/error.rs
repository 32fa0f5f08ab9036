//! Error types for the DSP runtime.
//!
//! Startup errors (configuration, client construction) are fatal and
//! propagate out of the service builders to `main`. Data-path errors are
//! logged by the component that hits them and never tear down the daemon.

use thiserror::Error;

/// Errors produced by the runtime.
#[derive(Error, Debug)]
pub enum DspError {
    /// Invalid or missing configuration value
    #[error("Invalid configuration '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    /// Lookup of a northbound interface by an unknown name
    #[error("Unknown interface with name: {name}")]
    UnknownInterface { name: String },

    /// Interfaces cannot be attached once the service is running
    #[error("Service already started")]
    ServiceStarted,

    /// Message is larger than `message.max.bytes`
    #[error("Message is larger than message.max.bytes")]
    MessageTooLarge,

    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("Unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: i32 },

    /// Headers were rejected because the record is already enqueued
    #[error("Message headers are read-only")]
    HeaderReadOnly,

    /// Routing rule set contains a duplicate priority
    #[error("Duplicate rule priority: {priority}")]
    DuplicateRulePriority { priority: i32 },

    /// Error raised by a connection handler while processing a frame
    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("Kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DspError {
    /// Create an invalid configuration error with context
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        DspError::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler(message: impl Into<String>) -> Self {
        DspError::Handler {
            message: message.into(),
        }
    }

    /// Create an unknown interface error
    pub fn unknown_interface(name: impl Into<String>) -> Self {
        DspError::UnknownInterface { name: name.into() }
    }

    /// Returns true for the unrecoverable producer send errors.
    ///
    /// Queue-full is not among them; it is the load-shedding path of
    /// `try_send`.
    pub fn is_fatal_send(&self) -> bool {
        matches!(
            self,
            DspError::MessageTooLarge
                | DspError::UnknownTopic { .. }
                | DspError::UnknownPartition { .. }
                | DspError::HeaderReadOnly
        )
    }
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, DspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::invalid_config("interfaces.southbound.port", "missing value");
        let msg = format!("{}", err);
        assert!(msg.contains("interfaces.southbound.port"));
        assert!(msg.contains("missing value"));
    }

    #[test]
    fn test_unknown_interface() {
        let err = DspError::unknown_interface("main-nb");
        assert!(format!("{}", err).contains("main-nb"));
    }

    #[test]
    fn test_fatal_send_classification() {
        assert!(DspError::MessageTooLarge.is_fatal_send());
        assert!(DspError::UnknownTopic {
            topic: "t".to_string()
        }
        .is_fatal_send());
        assert!(DspError::UnknownPartition {
            topic: "t".to_string(),
            partition: 0
        }
        .is_fatal_send());
        assert!(DspError::HeaderReadOnly.is_fatal_send());
        assert!(!DspError::ServiceStarted.is_fatal_send());
        assert!(!DspError::handler("x").is_fatal_send());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed");
        let err: DspError = io_err.into();
        assert!(format!("{}", err).contains("connection closed"));
    }
}
