//! Kafka consumer.
//!
//! Wraps rdkafka's `BaseConsumer`. Consumed records are detached into owned
//! message views so a batch can outlive the poll that produced it.

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, Consumer as _};
use rdkafka::error::KafkaError;
use rdkafka::message::{Headers, Message as _, OwnedMessage};
use rdkafka::types::RDKafkaErrorCode;
use tracing::{debug, warn};

use super::properties::{EventContext, Properties};
use crate::cache::Context;
use crate::error::Result;

/// Default poll timeout for the first message of a batch.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// An owned view of one consumed record.
///
/// Data views wrap the detached record. Partition-EOF markers and client
/// errors are synthetic views with `ok() == false`; handlers tell them apart
/// via `eof()`.
pub struct MessageView {
    inner: ViewInner,
}

enum ViewInner {
    Data(OwnedMessage),
    Eof { partition: i32 },
    Error(KafkaError),
}

impl MessageView {
    fn data(message: OwnedMessage) -> Self {
        Self {
            inner: ViewInner::Data(message),
        }
    }

    fn partition_eof(partition: i32) -> Self {
        Self {
            inner: ViewInner::Eof { partition },
        }
    }

    fn error(error: KafkaError) -> Self {
        Self {
            inner: ViewInner::Error(error),
        }
    }

    pub fn ok(&self) -> bool {
        matches!(self.inner, ViewInner::Data(_))
    }

    pub fn eof(&self) -> bool {
        matches!(self.inner, ViewInner::Eof { .. })
    }

    pub fn error_code(&self) -> RDKafkaErrorCode {
        match &self.inner {
            ViewInner::Data(_) => RDKafkaErrorCode::NoError,
            ViewInner::Eof { .. } => RDKafkaErrorCode::PartitionEOF,
            ViewInner::Error(error) => error
                .rdkafka_error_code()
                .unwrap_or(RDKafkaErrorCode::Unknown),
        }
    }

    pub fn error_message(&self) -> String {
        match &self.inner {
            ViewInner::Data(_) => String::new(),
            ViewInner::Eof { partition } => format!("Partition EOF: {}", partition),
            ViewInner::Error(error) => error.to_string(),
        }
    }

    pub fn key(&self) -> &[u8] {
        match &self.inner {
            ViewInner::Data(message) => message.key().unwrap_or(&[]),
            _ => &[],
        }
    }

    pub fn payload(&self) -> &[u8] {
        match &self.inner {
            ViewInner::Data(message) => message.payload().unwrap_or(&[]),
            _ => &[],
        }
    }

    /// Topic name; empty for synthetic views.
    pub fn topic(&self) -> &str {
        match &self.inner {
            ViewInner::Data(message) => message.topic(),
            _ => "",
        }
    }

    pub fn partition(&self) -> i32 {
        match &self.inner {
            ViewInner::Data(message) => message.partition(),
            ViewInner::Eof { partition } => *partition,
            ViewInner::Error(_) => -1,
        }
    }

    pub fn offset(&self) -> i64 {
        match &self.inner {
            ViewInner::Data(message) => message.offset(),
            _ => -1,
        }
    }

    /// Message headers, parsed on access.
    ///
    /// Returned borrows must not outlive the view.
    pub fn headers(&self) -> HashMap<&str, &[u8]> {
        let ViewInner::Data(message) = &self.inner else {
            return HashMap::new();
        };
        let Some(headers) = message.headers() else {
            return HashMap::new();
        };
        headers
            .iter()
            .filter_map(|header| header.value.map(|value| (header.key, value)))
            .collect()
    }
}

/// Processes consumed messages on the southbound listener thread.
pub trait KafkaHandler: Send {
    fn process(&mut self, message: &MessageView);

    /// Bind runtime context. Called once before the listener starts.
    fn bind(&mut self, _ctx: Context) {}
}

/// Kafka consumer wrapper.
///
/// Non-clonable; shared behind an `Arc` by the southbound listener.
pub struct Consumer {
    client: BaseConsumer<EventContext>,
}

impl Consumer {
    pub fn new(props: Properties) -> Result<Self> {
        let (config, callbacks) = props.into_parts();
        let client: BaseConsumer<EventContext> =
            config.create_with_context(EventContext::new(callbacks))?;
        Ok(Self { client })
    }

    /// Join the configured consumer group on the given topics.
    pub fn subscribe(&self, topics: &[String]) -> Result<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.client.subscribe(&topics)?;
        Ok(())
    }

    /// Leave the group. The deadline is librdkafka's own.
    pub fn unsubscribe(&self) {
        self.client.unsubscribe();
    }

    /// Consume up to `batch_size` messages.
    ///
    /// `timeout` bounds the wait for the first message; once anything is
    /// available the rest of the batch is collected without waiting. An
    /// empty batch is a valid outcome. Partition EOF and per-record errors
    /// come back as synthetic views; consume-level errors are logged, not
    /// returned.
    pub fn consume(&self, batch_size: usize, timeout: Duration) -> Vec<MessageView> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut wait = timeout;

        while batch.len() < batch_size {
            match self.client.poll(wait) {
                None => break,
                Some(Ok(message)) => batch.push(MessageView::data(message.detach())),
                Some(Err(KafkaError::PartitionEOF(partition))) => {
                    batch.push(MessageView::partition_eof(partition));
                }
                Some(Err(error)) => {
                    warn!("Error during consuming: {}", error);
                    batch.push(MessageView::error(error));
                }
            }
            wait = Duration::ZERO;
        }

        batch
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        debug!("Stopping Kafka consumer...");
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{OwnedHeaders, Header};
    use rdkafka::Timestamp;

    fn owned_message(key: Option<Vec<u8>>, payload: Vec<u8>) -> OwnedMessage {
        OwnedMessage::new(
            Some(payload),
            key,
            "heartbeats".to_string(),
            Timestamp::NotAvailable,
            2,
            42,
            None,
        )
    }

    #[test]
    fn test_data_view_accessors() {
        let view = MessageView::data(owned_message(Some(b"72".to_vec()), b"hello".to_vec()));

        assert!(view.ok());
        assert!(!view.eof());
        assert_eq!(view.error_code(), RDKafkaErrorCode::NoError);
        assert_eq!(view.key(), b"72");
        assert_eq!(view.payload(), b"hello");
        assert_eq!(view.topic(), "heartbeats");
        assert_eq!(view.partition(), 2);
        assert_eq!(view.offset(), 42);
        assert!(view.headers().is_empty());
    }

    #[test]
    fn test_eof_view() {
        let view = MessageView::partition_eof(3);

        assert!(!view.ok());
        assert!(view.eof());
        assert_eq!(view.partition(), 3);
        assert_eq!(view.offset(), -1);
        assert_eq!(view.topic(), "");
        assert_eq!(view.error_code(), RDKafkaErrorCode::PartitionEOF);
        assert!(view.error_message().contains("3"));
    }

    #[test]
    fn test_error_view() {
        let view = MessageView::error(KafkaError::Subscription("bad topic".to_string()));

        assert!(!view.ok());
        assert!(!view.eof());
        assert!(view.key().is_empty());
        assert!(view.payload().is_empty());
        assert!(view.error_message().contains("bad topic"));
    }

    #[test]
    fn test_headers_parse_on_access() {
        let headers = OwnedHeaders::new().insert(Header {
            key: "type",
            value: Some(b"heartbeat".as_slice()),
        });
        let message = OwnedMessage::new(
            Some(b"x".to_vec()),
            None,
            "dev-test".to_string(),
            Timestamp::NotAvailable,
            0,
            0,
            Some(headers),
        );
        let view = MessageView::data(message);

        let parsed = view.headers();
        assert_eq!(parsed.get("type").copied(), Some(b"heartbeat".as_slice()));
    }
}
