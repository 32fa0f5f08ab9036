//! Example data stream processing service.
//!
//! Reads its configuration from the file named by `DSP_CONFIG`, wires the
//! configured interfaces with metrics-feeding Kafka callbacks, and runs
//! until a stop signal arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{debug, error, info, trace, warn};

use dsp::cache::Northbound;
use dsp::config::ConfigFile;
use dsp::handlers::{AppContext, AppHandlerFactory, HandlerKind};
use dsp::kafka::{DeliveryHandler, KafkaHandler, MessageView, StatisticsHandler, ThrottleHandler};
use dsp::message::Message;
use dsp::metrics::MetricsRegistry;
use dsp::rdkafka::error::KafkaError;
use dsp::rdkafka::message::{BorrowedMessage, Message as _};
use dsp::router::Router;
use dsp::stat::Statistics;
use dsp::{Context, Result, Service};

/// Counts acknowledged and failed deliveries.
struct MetricsDeliveryHandler {
    metrics: Arc<MetricsRegistry>,
}

impl DeliveryHandler for MetricsDeliveryHandler {
    fn handle_success(&self, message: &BorrowedMessage<'_>) {
        let topic = message.topic();
        let bytes = message.payload().map(<[u8]>::len).unwrap_or(0) as u64;
        self.metrics
            .increment("sent_messages_total", 1, &[("topic", topic)]);
        self.metrics
            .increment("sent_bytes_total", bytes, &[("topic", topic)]);
    }

    fn handle_error(&self, error: &KafkaError, message: &BorrowedMessage<'_>) {
        error!("Delivery error to [{}] ({})", message.topic(), error);
        let bytes = message.payload().map(<[u8]>::len).unwrap_or(0) as u64;
        self.metrics
            .increment("drop_messages_total", 1, &[("drop_type", "kafka_delivery")]);
        self.metrics
            .increment("drop_bytes_total", bytes, &[("drop_type", "kafka_delivery")]);
    }
}

/// Exposes broker throttling as a gauge.
struct MetricsThrottleHandler {
    metrics: Arc<MetricsRegistry>,
}

impl ThrottleHandler for MetricsThrottleHandler {
    fn on_throttle(&self, broker_name: &str, throttle_time: Duration) {
        self.metrics.set(
            "kafka_throttling_time_ms",
            throttle_time.as_millis() as f64,
            &[("broker", broker_name)],
        );
    }
}

/// Logs the raw statistics blob.
struct LoggingStatisticsHandler;

impl StatisticsHandler for LoggingStatisticsHandler {
    fn on_statistics(&self, json: &str) {
        debug!("kafka statistics: {}", json);
    }
}

/// An example of a custom northbound interface.
struct CustomNorthbound;

impl Northbound for CustomNorthbound {
    fn send(&self, msg: &Message) -> Result<bool> {
        trace!("Message: {}", String::from_utf8_lossy(&msg.payload));
        Ok(true)
    }

    fn stop(&self) {}
}

/// Kafka southbound handler forwarding consumed records to the cache.
///
/// Tracks throughput between the first data record and partition EOF; at
/// EOF it logs the summary and requests shutdown, which makes the service
/// usable for replay measurements against a pre-filled topic.
struct ForwardingKafkaHandler {
    ctx: Option<Context>,
    topic: String,
    stats: Option<Statistics>,
}

impl ForwardingKafkaHandler {
    fn new(topic: String) -> Self {
        Self {
            ctx: None,
            topic,
            stats: None,
        }
    }
}

impl KafkaHandler for ForwardingKafkaHandler {
    fn process(&mut self, message: &MessageView) {
        let Some(ctx) = &self.ctx else {
            return;
        };

        if !message.ok() {
            if message.eof() {
                debug!(
                    "End of partition {}[{}] at offset {}",
                    message.topic(),
                    message.partition(),
                    message.offset()
                );

                if let Some(stats) = self.stats.take() {
                    info!("{}", stats.summary());
                    debug!("Stopping application... (SIGINT)");
                    let _ = signal_hook::low_level::raise(signal_hook::consts::SIGINT);
                }
                return;
            }

            warn!(
                "Kafka error message: {} ({})",
                message.error_message(),
                message.error_code()
            );
            return;
        }

        let stats = self.stats.get_or_insert_with(Statistics::new);

        let msg = Message {
            key: message.key().to_vec(),
            subject: self.topic.clone(),
            properties: dsp::Properties::new(),
            payload: message.payload().to_vec(),
        };

        ctx.metrics.increment("process_messages_total", 1, &[]);
        ctx.metrics
            .increment("process_bytes_total", msg.payload.len() as u64, &[]);
        stats.observe(msg.payload.len(), 1);

        match ctx.cache.send(&msg) {
            Ok(true) => {}
            Ok(false) => {
                ctx.metrics
                    .increment("drop_messages_total", 1, &[("drop_type", "load_shed")]);
                ctx.metrics.increment(
                    "drop_bytes_total",
                    msg.payload.len() as u64,
                    &[("drop_type", "load_shed")],
                );
            }
            Err(e) => {
                error!("Failed to send message to '{}': {}", msg.subject, e);
            }
        }
    }

    fn bind(&mut self, ctx: Context) {
        self.ctx = Some(ctx);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(error) = run() {
        error!("Service failed: {:#}", error);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    info!("Starting service");

    let config = ConfigFile::from_env().context("loading configuration")?;
    let app = config.app.clone().unwrap_or_default();

    let mut service = Service::new(config.dsp.clone())?;
    let metrics = service.metrics();

    {
        let mut builder = service.cfg_northbound()?;
        match builder.kafka_props() {
            Ok(props) => {
                props.delivery_callback(Box::new(MetricsDeliveryHandler {
                    metrics: metrics.clone(),
                }));
                props.throttle_callback(Box::new(MetricsThrottleHandler {
                    metrics: metrics.clone(),
                }));
                props.statistics_callback(Box::new(LoggingStatisticsHandler));
            }
            Err(_) => {
                warn!("Cannot attach Kafka callbacks, northbound interface is either not enabled or not a Kafka producer");
            }
        }
        builder.build().context("building northbound interface")?;
    }

    let topic = app.topic.clone().unwrap_or_default();
    let app_ctx = Arc::new(AppContext {
        router: Router::default(),
        topic: topic.clone(),
    });

    {
        let mut builder = service.cfg_southbound()?;
        match config.dsp.interfaces.southbound.kind.as_str() {
            "tcp" => {
                let kind = HandlerKind::parse(app.handler.as_deref().unwrap_or("telemetry"))?;
                builder.tcp_handler(Arc::new(AppHandlerFactory::new(kind)));
            }
            "kafka" => {
                builder.kafka_handler(Box::new(ForwardingKafkaHandler::new(topic)));
                builder.kafka_props()?.offset_earliest();
                builder.kafka_props()?.enable_partition_eof();
            }
            other => {
                error!("Invalid southbound configuration: {}", other);
            }
        }
        builder.bind(app_ctx);
        builder.build().context("building southbound interface")?;
    }

    service.attach_northbound("custom-nb", CustomNorthbound)?;

    service.start()?;

    info!("Service stopped");
    Ok(())
}
