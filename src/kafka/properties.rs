//! Kafka client configuration.

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::client::ClientContext;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{DeliveryResult, ProducerContext};
use rdkafka::Statistics;
use tracing::{debug, error, info, warn};

/// Per-message delivery outcome handler.
///
/// Invoked on the producer's poller thread with a non-owning view of the
/// acknowledged or failed record. Must not call back into the producer.
pub trait DeliveryHandler: Send + Sync {
    fn handle_success(&self, message: &BorrowedMessage<'_>);
    fn handle_error(&self, error: &KafkaError, message: &BorrowedMessage<'_>);
}

/// Broker throttling notification.
pub trait ThrottleHandler: Send + Sync {
    fn on_throttle(&self, broker_name: &str, throttle_time: Duration);
}

/// Raw statistics blob, emitted at `statistics.interval.ms`.
pub trait StatisticsHandler: Send + Sync {
    fn on_statistics(&self, json: &str);
}

#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) delivery: Option<Box<dyn DeliveryHandler>>,
    pub(crate) throttle: Option<Box<dyn ThrottleHandler>>,
    pub(crate) statistics: Option<Box<dyn StatisticsHandler>>,
}

/// A factory-like type holding client configuration.
///
/// Dual API: common properties are exposed via named functions, everything
/// else goes through `set`. It holds both producer and consumer properties;
/// not all of them apply to both.
#[derive(Default)]
pub struct Properties {
    cfg: HashMap<String, String>,
    pub(crate) callbacks: Callbacks,
}

impl Properties {
    pub const BOOTSTRAP_SERVERS: &'static str = "bootstrap.servers";
    pub const GROUP_ID: &'static str = "group.id";
    pub const OFFSET_RESET: &'static str = "auto.offset.reset";
    pub const STATISTICS_INTERVAL: &'static str = "statistics.interval.ms";
    pub const PARTITION_EOF: &'static str = "enable.partition.eof";

    pub fn new() -> Self {
        Self::default()
    }

    /// Set an arbitrary property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.cfg.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.cfg.get(key).map(String::as_str)
    }

    pub fn bootstrap_server(&mut self, value: &str) {
        self.set(Self::BOOTSTRAP_SERVERS, value);
    }

    pub fn statistics_interval(&mut self, interval: Duration) {
        self.set(Self::STATISTICS_INTERVAL, interval.as_millis().to_string());
    }

    /// Consumer group ID.
    pub fn group_id(&mut self, value: &str) {
        self.set(Self::GROUP_ID, value);
    }

    pub fn offset_earliest(&mut self) {
        self.set(Self::OFFSET_RESET, "earliest");
    }

    pub fn offset_latest(&mut self) {
        self.set(Self::OFFSET_RESET, "latest");
    }

    /// Surface partition EOF as synthetic consumer records.
    pub fn enable_partition_eof(&mut self) {
        self.set(Self::PARTITION_EOF, "true");
    }

    /// Server-authenticated TLS.
    pub fn tls(&mut self, ca_location: &str) {
        self.set("security.protocol", "ssl");
        self.set("ssl.ca.location", ca_location);
    }

    /// Mutual TLS.
    pub fn mtls(
        &mut self,
        ca_location: &str,
        certificate_location: &str,
        key_location: &str,
        key_password: Option<&str>,
    ) {
        self.tls(ca_location);
        self.set("ssl.certificate.location", certificate_location);
        self.set("ssl.key.location", key_location);
        self.set("ssl.key.password", key_password.unwrap_or(""));
    }

    pub fn delivery_callback(&mut self, callback: Box<dyn DeliveryHandler>) {
        self.callbacks.delivery = Some(callback);
    }

    pub fn throttle_callback(&mut self, callback: Box<dyn ThrottleHandler>) {
        self.callbacks.throttle = Some(callback);
    }

    pub fn statistics_callback(&mut self, callback: Box<dyn StatisticsHandler>) {
        self.callbacks.statistics = Some(callback);
    }

    /// Split into the rdkafka client configuration and the callback set.
    pub(crate) fn into_parts(self) -> (ClientConfig, Callbacks) {
        let mut config = ClientConfig::new();
        for (key, value) in &self.cfg {
            config.set(key, value);
        }
        (config, self.callbacks)
    }
}

/// Client context fanning rdkafka events out to the installed handlers.
///
/// The context owns the handler trait objects; handlers never own the
/// client.
pub(crate) struct EventContext {
    callbacks: Callbacks,
}

impl EventContext {
    pub(crate) fn new(callbacks: Callbacks) -> Self {
        Self { callbacks }
    }
}

impl ClientContext for EventContext {
    /// Forward librdkafka log events with severity mapping.
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => error!("kafka: {} {}", fac, log_message),
            RDKafkaLogLevel::Warning => warn!("kafka: {} {}", fac, log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!("kafka: {} {}", fac, log_message)
            }
            RDKafkaLogLevel::Debug => debug!("kafka: {} {}", fac, log_message),
        }
    }

    /// Hand the raw statistics blob to the statistics handler and surface
    /// per-broker throttle windows to the throttle handler.
    ///
    /// rdkafka has no binding for librdkafka's dedicated throttle callback;
    /// the broker throttle averages inside the statistics payload carry the
    /// same information at `statistics.interval.ms` granularity.
    fn stats_raw(&self, statistics: &[u8]) {
        if let Some(handler) = &self.callbacks.statistics {
            handler.on_statistics(&String::from_utf8_lossy(statistics));
        }

        if let Some(handler) = &self.callbacks.throttle {
            match serde_json::from_slice::<Statistics>(statistics) {
                Ok(stats) => {
                    for broker in stats.brokers.values() {
                        if let Some(throttle) = &broker.throttle {
                            if throttle.avg > 0 {
                                handler.on_throttle(
                                    &broker.name,
                                    Duration::from_millis(throttle.avg as u64),
                                );
                            }
                        }
                    }
                }
                Err(e) => debug!("Failed to parse statistics payload: {}", e),
            }
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        warn!("kafka client error: {} ({})", error, reason);
    }
}

impl ProducerContext for EventContext {
    type DeliveryOpaque = ();

    /// Demultiplex delivery reports into success and error handlers.
    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _delivery_opaque: ()) {
        let Some(handler) = &self.callbacks.delivery else {
            return;
        };
        match delivery_result {
            Ok(message) => handler.handle_success(message),
            Err((error, message)) => handler.handle_error(error, message),
        }
    }
}

impl ConsumerContext for EventContext {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_helpers_set_expected_keys() {
        let mut props = Properties::new();
        props.bootstrap_server("localhost:9092");
        props.group_id("dsp-test");
        props.offset_earliest();
        props.statistics_interval(Duration::from_millis(500));
        props.enable_partition_eof();

        assert_eq!(props.get(Properties::BOOTSTRAP_SERVERS), Some("localhost:9092"));
        assert_eq!(props.get(Properties::GROUP_ID), Some("dsp-test"));
        assert_eq!(props.get(Properties::OFFSET_RESET), Some("earliest"));
        assert_eq!(props.get(Properties::STATISTICS_INTERVAL), Some("500"));
        assert_eq!(props.get(Properties::PARTITION_EOF), Some("true"));
    }

    #[test]
    fn test_offset_latest_overwrites() {
        let mut props = Properties::new();
        props.offset_earliest();
        props.offset_latest();
        assert_eq!(props.get(Properties::OFFSET_RESET), Some("latest"));
    }

    #[test]
    fn test_tls_and_mtls() {
        let mut props = Properties::new();
        props.tls("/etc/ssl/ca.pem");
        assert_eq!(props.get("security.protocol"), Some("ssl"));
        assert_eq!(props.get("ssl.ca.location"), Some("/etc/ssl/ca.pem"));

        let mut props = Properties::new();
        props.mtls("/ca.pem", "/cert.pem", "/key.pem", Some("secret"));
        assert_eq!(props.get("ssl.certificate.location"), Some("/cert.pem"));
        assert_eq!(props.get("ssl.key.location"), Some("/key.pem"));
        assert_eq!(props.get("ssl.key.password"), Some("secret"));
    }

    #[test]
    fn test_generic_set_passthrough() {
        let mut props = Properties::new();
        props.set("queue.buffering.max.messages", "10");
        assert_eq!(props.get("queue.buffering.max.messages"), Some("10"));
    }
}
