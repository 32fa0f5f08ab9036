//! Kafka clients.
//!
//! Wrappers around rdkafka's base producer and consumer. Client events
//! (delivery reports, statistics, log lines) are fanned out to handler trait
//! objects owned by a single context record inside the client.

pub mod consumer;
pub mod producer;
pub mod properties;

pub use consumer::{Consumer, KafkaHandler, MessageView};
pub use producer::Producer;
pub use properties::{DeliveryHandler, Properties, StatisticsHandler, ThrottleHandler};
