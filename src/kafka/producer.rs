//! Kafka producer.
//!
//! Built on rdkafka's `BaseProducer` so the queue-full condition stays
//! visible to the caller for load shedding. A dedicated poller thread drives
//! delivery reports, statistics and log events into the handlers installed
//! on the `Properties`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer as _};
use rdkafka::types::RDKafkaErrorCode;
use tracing::{debug, warn};

use super::properties::{EventContext, Properties};
use crate::error::{DspError, Result};
use crate::message::Message;

/// Poll timeout used by the poller thread.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Poll timeout between retries when the queue is full.
const RETRY_POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Flush deadline applied on drop.
const DROP_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka producer with a background event poller.
///
/// Non-clonable; the embedding interface owns it for process lifetime. Topic
/// handles are created lazily by the client on first use of a subject and
/// reused for the lifetime of the producer.
pub struct Producer {
    client: Arc<BaseProducer<EventContext>>,
    keep_alive: Arc<AtomicBool>,
    poll_thread: Option<JoinHandle<()>>,
}

impl Producer {
    /// Create a producer and start its background polling thread.
    pub fn new(props: Properties) -> Result<Self> {
        let (config, callbacks) = props.into_parts();
        let client: BaseProducer<EventContext> =
            config.create_with_context(EventContext::new(callbacks))?;
        let client = Arc::new(client);
        let keep_alive = Arc::new(AtomicBool::new(true));

        let poll_client = client.clone();
        let poll_alive = keep_alive.clone();
        let poll_thread = std::thread::Builder::new()
            .name("dsp-kafka-poll".into())
            .spawn(move || {
                while poll_alive.load(Ordering::Relaxed) {
                    poll_client.poll(POLL_TIMEOUT);
                }
            })?;

        Ok(Self {
            client,
            keep_alive,
            poll_thread: Some(poll_thread),
        })
    }

    /// Try to enqueue a message.
    ///
    /// Returns `Ok(false)` if the internal producer queue is full; treat it
    /// as the load-shedding signal. The payload and key are copied at
    /// enqueue, so the caller's buffers are immediately reusable.
    ///
    /// Unrecoverable errors (message too large, unknown topic or partition,
    /// read-only headers) are returned as errors.
    pub fn try_send(&self, msg: &Message) -> Result<bool> {
        match self.send_impl(msg) {
            Ok(()) => Ok(true),
            Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => Ok(false),
            Err(error) => Err(map_send_error(error, msg)),
        }
    }

    /// Enqueue a message, retrying while the queue is full.
    ///
    /// Polls the client between attempts so delivery reports keep flowing
    /// even if the poller thread falls behind. Raises the same unrecoverable
    /// errors as `try_send`.
    pub fn send(&self, msg: &Message) -> Result<()> {
        loop {
            match self.send_impl(msg) {
                Ok(()) => return Ok(()),
                Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => {
                    self.client.poll(RETRY_POLL_TIMEOUT);
                }
                Err(error) => return Err(map_send_error(error, msg)),
            }
        }
    }

    /// Flush pending messages.
    ///
    /// Returns false if it timed out.
    pub fn flush(&self, timeout: Duration) -> bool {
        match self.client.flush(timeout) {
            Ok(()) => true,
            Err(e) => {
                debug!("Flush did not complete: {}", e);
                false
            }
        }
    }

    /// Number of messages and events waiting in queues.
    ///
    /// Messages to be sent or waiting for acknowledgement, delivery reports
    /// and pending callbacks.
    pub fn queue_size(&self) -> i32 {
        self.client.in_flight_count()
    }

    /// Stop the background poller. Idempotent.
    pub fn stop(&self) {
        debug!("Stopping Kafka producer...");
        self.keep_alive.store(false, Ordering::Relaxed);
    }

    fn send_impl(&self, msg: &Message) -> std::result::Result<(), KafkaError> {
        let mut record: BaseRecord<'_, Vec<u8>, Vec<u8>> =
            BaseRecord::to(&msg.subject).key(&msg.key).payload(&msg.payload);

        if !msg.properties.is_empty() {
            let mut headers = OwnedHeaders::new_with_capacity(msg.properties.len());
            for (key, value) in &msg.properties {
                headers = headers.insert(Header {
                    key,
                    value: Some(value.as_bytes()),
                });
            }
            record = record.headers(headers);
        }

        self.client.send(record).map_err(|(error, _)| error)
    }
}

impl Drop for Producer {
    /// Best-effort flush with a fixed deadline, then stop and join the
    /// poller. Call `flush` explicitly before drop to observe timeouts.
    fn drop(&mut self) {
        if !self.flush(DROP_FLUSH_TIMEOUT) {
            warn!("Producer flush timed out during shutdown");
        }
        self.stop();
        if let Some(handle) = self.poll_thread.take() {
            let _ = handle.join();
        }
    }
}

fn map_send_error(error: KafkaError, msg: &Message) -> DspError {
    match error {
        KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge) => {
            DspError::MessageTooLarge
        }
        KafkaError::MessageProduction(RDKafkaErrorCode::UnknownTopic)
        | KafkaError::MessageProduction(RDKafkaErrorCode::UnknownTopicOrPartition) => {
            DspError::UnknownTopic {
                topic: msg.subject.clone(),
            }
        }
        KafkaError::MessageProduction(RDKafkaErrorCode::UnknownPartition) => {
            DspError::UnknownPartition {
                topic: msg.subject.clone(),
                partition: -1,
            }
        }
        KafkaError::MessageProduction(RDKafkaErrorCode::ReadOnly) => DspError::HeaderReadOnly,
        other => DspError::Kafka(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_send_error_fatal_variants() {
        let msg = Message::new("dev-test", Vec::new());

        let err = map_send_error(
            KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge),
            &msg,
        );
        assert!(matches!(err, DspError::MessageTooLarge));
        assert!(err.is_fatal_send());

        let err = map_send_error(
            KafkaError::MessageProduction(RDKafkaErrorCode::UnknownTopic),
            &msg,
        );
        assert!(matches!(err, DspError::UnknownTopic { ref topic } if topic == "dev-test"));

        let err = map_send_error(
            KafkaError::MessageProduction(RDKafkaErrorCode::UnknownPartition),
            &msg,
        );
        assert!(matches!(err, DspError::UnknownPartition { .. }));

        let err = map_send_error(
            KafkaError::MessageProduction(RDKafkaErrorCode::ReadOnly),
            &msg,
        );
        assert!(matches!(err, DspError::HeaderReadOnly));
    }

    #[test]
    fn test_map_send_error_passthrough() {
        let msg = Message::new("dev-test", Vec::new());
        let err = map_send_error(
            KafkaError::MessageProduction(RDKafkaErrorCode::InvalidMessage),
            &msg,
        );
        assert!(matches!(err, DspError::Kafka(_)));
        assert!(!err.is_fatal_send());
    }
}
