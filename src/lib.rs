//! Data stream processing runtime.
//!
//! A framework for long-running services that ingest message streams from a
//! southbound source (a TCP listener with length-prefixed framing, or a
//! Kafka consumer group), apply per-message routing and transformation, and
//! forward the results to one or more northbound sinks (a Kafka producer, or
//! custom sinks). Applications supply message handlers and routing rules;
//! the runtime supplies the listener loops, the broadcast fan-out cache, the
//! lifecycle, the metrics registry and signal-driven shutdown.
//!
//! Data flows southbound listener → handler → router → broadcast cache →
//! northbound sinks. The main thread runs the signal daemon; each listener
//! runs on its own worker thread; the Kafka producer polls events on a
//! background thread of its own.

pub mod cache;
pub mod config;
pub mod daemon;
pub mod error;
pub mod handlers;
pub mod interfaces;
pub mod kafka;
pub mod message;
pub mod metrics;
pub mod router;
pub mod service;
pub mod stat;
pub mod tcp;
pub mod token_bucket;

// The underlying Kafka client crate, for applications implementing delivery
// or statistics handlers against its message types.
pub use rdkafka;

pub use cache::{Cache, Context, Northbound};
pub use error::{DspError, Result};
pub use interfaces::Southbound;
pub use message::{Message, Properties};
pub use metrics::MetricsRegistry;
pub use router::{Action, Matcher, Router, Rule};
pub use service::Service;
pub use token_bucket::TokenBucket;
