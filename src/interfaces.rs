//! Interfaces wrapping various clients (sources, sinks). Integration point
//! with the DSP runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::cache::{Context, Northbound};
use crate::error::Result;
use crate::kafka::{Consumer, KafkaHandler, Producer, Properties};
use crate::message::Message;
use crate::metrics::MetricsRegistry;
use crate::tcp::{HandlerFactory, NetConfig, Server};

/// A southbound message source.
///
/// The listener closure is a blocking event loop, started on a dedicated
/// worker thread by the service. `stop` may be called from any thread, must
/// be idempotent, and must make the listener return promptly.
pub trait Southbound: Send {
    /// Bind runtime context. Called once before the listener starts.
    fn bind(&mut self, ctx: Context);

    /// Produce the blocking listener closure. Called exactly once.
    fn listener(&mut self) -> Box<dyn FnOnce() + Send>;

    fn stop(&self);

    /// Publish listener metrics. Called periodically from the daemon
    /// watchdog.
    fn update(&self, _metrics: &MetricsRegistry) {}
}

/// A thin northbound wrapper around the Kafka producer client.
pub struct KafkaProducerInterface {
    client: Producer,
}

impl KafkaProducerInterface {
    pub fn new(props: Properties) -> Result<Self> {
        Ok(Self {
            client: Producer::new(props)?,
        })
    }

    pub fn queue_size(&self) -> i32 {
        self.client.queue_size()
    }

    /// Flush pending messages; false on timeout. Use before teardown when
    /// delivery matters.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.client.flush(timeout)
    }
}

impl Northbound for KafkaProducerInterface {
    fn send(&self, msg: &Message) -> Result<bool> {
        self.client.try_send(msg)
    }

    fn stop(&self) {
        self.client.stop();
    }

    fn update(&self, metrics: &MetricsRegistry) {
        metrics.set("kafka_queue_size", self.queue_size() as f64, &[]);
    }
}

/// Settings for a Kafka southbound listener.
pub struct KafkaSouthboundCfg {
    pub props: Properties,
    pub topics: Vec<String>,
    pub batch_size: usize,
    pub poll_timeout: Duration,
}

/// Southbound listener driving a Kafka consumer in batches.
pub struct KafkaSouthbound {
    client: Arc<Consumer>,
    handler: Option<Box<dyn KafkaHandler>>,
    alive: Arc<AtomicBool>,
    topics: Vec<String>,
    batch_size: usize,
    poll_timeout: Duration,
}

impl KafkaSouthbound {
    pub fn new(cfg: KafkaSouthboundCfg, handler: Box<dyn KafkaHandler>) -> Result<Self> {
        Ok(Self {
            client: Arc::new(Consumer::new(cfg.props)?),
            handler: Some(handler),
            alive: Arc::new(AtomicBool::new(true)),
            topics: cfg.topics,
            batch_size: cfg.batch_size,
            poll_timeout: cfg.poll_timeout,
        })
    }
}

impl Southbound for KafkaSouthbound {
    fn bind(&mut self, ctx: Context) {
        if let Some(handler) = self.handler.as_mut() {
            handler.bind(ctx);
        }
    }

    fn listener(&mut self) -> Box<dyn FnOnce() + Send> {
        let client = self.client.clone();
        let alive = self.alive.clone();
        let topics = self.topics.clone();
        let batch_size = self.batch_size;
        let poll_timeout = self.poll_timeout;
        let mut handler = self
            .handler
            .take()
            .expect("listener closure is created once");

        Box::new(move || {
            info!("Starting Kafka listener (consuming topics: {:?})", topics);
            if let Err(e) = client.subscribe(&topics) {
                error!("Failed to subscribe: {}", e);
                return;
            }

            while alive.load(Ordering::Relaxed) {
                for message in client.consume(batch_size, poll_timeout) {
                    handler.process(&message);
                }
            }

            info!("Kafka listener stopped");
        })
    }

    fn stop(&self) {
        debug!("Stopping Kafka listener...");
        self.alive.store(false, Ordering::Relaxed);
    }

    /// There are no custom consumer metrics; the client's own numbers flow
    /// through the statistics callback.
    fn update(&self, _metrics: &MetricsRegistry) {}
}

/// Southbound listener running the TCP server.
pub struct TcpSouthbound {
    server: Arc<Server>,
    factory: Arc<dyn HandlerFactory>,
}

impl TcpSouthbound {
    pub fn new(cfg: NetConfig, factory: Arc<dyn HandlerFactory>) -> Self {
        Self {
            server: Arc::new(Server::new(cfg, factory.clone())),
            factory,
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }
}

impl Southbound for TcpSouthbound {
    fn bind(&mut self, ctx: Context) {
        self.factory.bind(ctx);
    }

    fn listener(&mut self) -> Box<dyn FnOnce() + Send> {
        let server = self.server.clone();
        Box::new(move || {
            info!("Starting TCP server on port {}", server.port());
            if let Err(e) = server.run() {
                error!("TCP server terminated: {}", e);
            }
        })
    }

    fn stop(&self) {
        self.server.stop();
    }

    fn update(&self, metrics: &MetricsRegistry) {
        let m = self.server.metrics();
        metrics.set(
            "connection_count",
            m.connections.load(Ordering::Relaxed) as f64,
            &[],
        );
        metrics.set(
            "tcp_buffer_size",
            m.buffer_size.load(Ordering::Relaxed) as f64,
            &[],
        );
        metrics.set(
            "tcp_buffer_capacity",
            m.buffer_capacity.load(Ordering::Relaxed) as f64,
            &[],
        );
    }
}
