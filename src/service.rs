//! The service which provides the runtime framework.
//!
//! Wiring order: `Service::new` builds the metrics registry and the
//! broadcast cache; the interface builders turn configuration into
//! components (installing Kafka callbacks first where the application wants
//! them); `start` binds context, spawns the listener thread and blocks on
//! the daemon loop.

use std::any::Any;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::cache::{Cache, Context, Northbound};
use crate::config::{DspConfig, NorthboundKind, SouthboundKind};
use crate::daemon::Daemon;
use crate::error::{DspError, Result};
use crate::interfaces::{
    KafkaProducerInterface, KafkaSouthbound, KafkaSouthboundCfg, Southbound, TcpSouthbound,
};
use crate::kafka::{KafkaHandler, Properties};
use crate::metrics::MetricsRegistry;
use crate::tcp::HandlerFactory;

pub struct Service {
    config: DspConfig,
    metrics: Arc<MetricsRegistry>,
    cache: Arc<Cache>,
    southbound: Option<Box<dyn Southbound>>,
    app: Option<Arc<dyn Any + Send + Sync>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Service {
    /// Create a service from configuration.
    ///
    /// Builds the metrics registry and the broadcast cache; interfaces are
    /// added through the builders before `start`.
    pub fn new(config: DspConfig) -> Result<Self> {
        Ok(Self {
            config,
            metrics: Arc::new(MetricsRegistry::new()),
            cache: Arc::new(Cache::new()),
            southbound: None,
            app: None,
            workers: Vec::new(),
        })
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }

    pub fn daemon_interval(&self) -> Duration {
        self.config.daemon_interval()
    }

    /// Attach a northbound interface under `name`, keeping the typed handle.
    pub fn attach_northbound<N: Northbound + 'static>(
        &mut self,
        name: &str,
        interface: N,
    ) -> Result<Arc<N>> {
        let cache = Arc::get_mut(&mut self.cache).ok_or(DspError::ServiceStarted)?;
        Ok(cache.attach(name, interface))
    }

    /// Access a northbound interface by name.
    pub fn northbound(&self, name: &str) -> Result<&Arc<dyn Northbound>> {
        self.cache.get(name)
    }

    /// Replace the southbound component with an application-provided one.
    /// Meant for the `custom` southbound type.
    pub fn set_southbound(&mut self, southbound: Box<dyn Southbound>) {
        self.southbound = Some(southbound);
    }

    /// Start configuring the northbound interface.
    pub fn cfg_northbound(&mut self) -> Result<NorthboundBuilder<'_>> {
        let (settings, props) = match self.config.northbound()? {
            NorthboundKind::Kafka(settings) => {
                let mut props = Properties::new();
                props.bootstrap_server(&settings.address);
                if let Some(ms) = settings.statistics_interval_ms {
                    props.statistics_interval(Duration::from_millis(ms));
                }
                (Some(settings), props)
            }
            NorthboundKind::Custom | NorthboundKind::Disabled => (None, Properties::new()),
        };

        Ok(NorthboundBuilder {
            service: self,
            settings,
            props,
        })
    }

    /// Start configuring the southbound interface.
    pub fn cfg_southbound(&mut self) -> Result<SouthboundBuilder<'_>> {
        let kind = self.config.southbound()?;
        let props = match &kind {
            SouthboundKind::Kafka(settings) => {
                let mut props = Properties::new();
                props.bootstrap_server(&settings.address);
                props.group_id(&settings.group_id);
                if let Some(ms) = settings.statistics_interval_ms {
                    props.statistics_interval(Duration::from_millis(ms));
                }
                props
            }
            SouthboundKind::Tcp(_) | SouthboundKind::Custom => Properties::new(),
        };

        Ok(SouthboundBuilder {
            service: self,
            kind,
            props,
            tcp_factory: None,
            kafka_handler: None,
            app: None,
        })
    }

    /// Start the service and block until shutdown.
    ///
    /// Binds the runtime context, starts the southbound listener on a
    /// dedicated worker thread and runs the daemon loop on the calling
    /// thread. The daemon watchdog pumps metrics out of every interface once
    /// per tick. When the loop exits, `stop` has been called.
    pub fn start(&mut self) -> Result<()> {
        let ctx = Context {
            metrics: self.metrics.clone(),
            cache: self.cache.clone(),
            app: self
                .app
                .clone()
                .unwrap_or_else(|| Arc::new(()) as Arc<dyn Any + Send + Sync>),
        };

        if let Some(southbound) = self.southbound.as_mut() {
            southbound.bind(ctx);
            let listener = southbound.listener();
            let worker = thread::Builder::new()
                .name("dsp-southbound".into())
                .spawn(listener)?;
            self.workers.push(worker);
        }

        let mut daemon = Daemon::new()?;
        let interval = self.daemon_interval();
        {
            let southbound = &self.southbound;
            let cache = &self.cache;
            let metrics = &self.metrics;
            daemon.start(interval, || {
                if let Some(southbound) = southbound {
                    southbound.update(metrics);
                }
                for (_, interface) in cache.interfaces() {
                    interface.update(metrics);
                }
                true
            });
        }

        self.stop();
        Ok(())
    }

    /// Stop execution.
    ///
    /// Each component's `stop` is non-blocking and cooperative; worker
    /// threads observe it at their next poll boundary. The join handles are
    /// dropped rather than joined so a worker stuck inside a native call
    /// cannot hang process exit.
    pub fn stop(&mut self) {
        if let Some(southbound) = &self.southbound {
            southbound.stop();
        }
        self.cache.stop();
        self.workers.clear();
    }
}

/// Builder for the configured northbound interface.
///
/// Kafka callback handlers go onto `kafka_props` before `build` creates the
/// producer.
pub struct NorthboundBuilder<'a> {
    service: &'a mut Service,
    settings: Option<crate::config::KafkaNorthboundSettings>,
    props: Properties,
}

impl NorthboundBuilder<'_> {
    /// Access the Kafka client properties.
    ///
    /// Fails when the configured northbound is not an enabled Kafka
    /// producer.
    pub fn kafka_props(&mut self) -> Result<&mut Properties> {
        if self.settings.is_none() {
            return Err(DspError::invalid_config(
                "interfaces.northbound",
                "not an enabled Kafka northbound",
            ));
        }
        Ok(&mut self.props)
    }

    pub fn build(self) -> Result<()> {
        let NorthboundBuilder {
            service,
            settings,
            props,
        } = self;

        let Some(settings) = settings else {
            // Custom interfaces are attached by the application; disabled
            // ones need nothing.
            return Ok(());
        };

        let interface = KafkaProducerInterface::new(props)?;
        service.attach_northbound(&settings.name, interface)?;
        info!("Attached Kafka northbound interface '{}'", settings.name);
        Ok(())
    }
}

/// Builder for the configured southbound interface.
pub struct SouthboundBuilder<'a> {
    service: &'a mut Service,
    kind: SouthboundKind,
    props: Properties,
    tcp_factory: Option<Arc<dyn HandlerFactory>>,
    kafka_handler: Option<Box<dyn KafkaHandler>>,
    app: Option<Arc<dyn Any + Send + Sync>>,
}

impl SouthboundBuilder<'_> {
    /// Set the TCP handler factory.
    pub fn tcp_handler(&mut self, factory: Arc<dyn HandlerFactory>) {
        self.tcp_factory = Some(factory);
    }

    /// Set the Kafka message handler.
    pub fn kafka_handler(&mut self, handler: Box<dyn KafkaHandler>) {
        self.kafka_handler = Some(handler);
    }

    /// Access the Kafka client properties.
    pub fn kafka_props(&mut self) -> Result<&mut Properties> {
        if !matches!(self.kind, SouthboundKind::Kafka(_)) {
            return Err(DspError::invalid_config(
                "interfaces.southbound",
                "not a Kafka southbound",
            ));
        }
        Ok(&mut self.props)
    }

    /// Bind the application context handed to handlers.
    pub fn bind(&mut self, app: Arc<dyn Any + Send + Sync>) {
        self.app = Some(app);
    }

    pub fn build(self) -> Result<()> {
        let SouthboundBuilder {
            service,
            kind,
            props,
            tcp_factory,
            kafka_handler,
            app,
        } = self;

        if let Some(app) = app {
            service.app = Some(app);
        }

        match kind {
            SouthboundKind::Tcp(net) => {
                let factory = tcp_factory.ok_or_else(|| {
                    DspError::invalid_config(
                        "interfaces.southbound",
                        "TCP southbound requires a handler factory",
                    )
                })?;
                service.southbound = Some(Box::new(TcpSouthbound::new(net, factory)));
            }
            SouthboundKind::Kafka(settings) => {
                let handler = kafka_handler.ok_or_else(|| {
                    DspError::invalid_config(
                        "interfaces.southbound",
                        "Kafka southbound requires a message handler",
                    )
                })?;
                let cfg = KafkaSouthboundCfg {
                    props,
                    topics: settings.topics,
                    batch_size: settings.batch_size,
                    poll_timeout: settings.poll_timeout,
                };
                service.southbound = Some(Box::new(KafkaSouthbound::new(cfg, handler)?));
            }
            SouthboundKind::Custom => {
                // The application installs its own component via
                // `set_southbound`.
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::message::Message;

    struct NullSink;

    impl Northbound for NullSink {
        fn send(&self, _msg: &Message) -> Result<bool> {
            Ok(true)
        }

        fn stop(&self) {}
    }

    fn tcp_config() -> DspConfig {
        ConfigFile::from_yaml(
            r#"
dsp:
  daemon-interval: 1
  interfaces:
    southbound:
      type: tcp
      port: 17001
    northbound:
      type: kafka
      enabled: false
    metrics:
      enabled: false
"#,
        )
        .unwrap()
        .dsp
    }

    #[test]
    fn test_disabled_northbound_builds_nothing() {
        let mut service = Service::new(tcp_config()).unwrap();
        let mut builder = service.cfg_northbound().unwrap();
        assert!(builder.kafka_props().is_err());
        builder.build().unwrap();
        assert!(service.cache.is_empty());
    }

    #[test]
    fn test_tcp_southbound_requires_factory() {
        let mut service = Service::new(tcp_config()).unwrap();
        let builder = service.cfg_southbound().unwrap();
        assert!(matches!(
            builder.build(),
            Err(DspError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_attach_and_lookup_northbound() {
        let mut service = Service::new(tcp_config()).unwrap();
        service.attach_northbound("custom-nb", NullSink).unwrap();
        assert!(service.northbound("custom-nb").is_ok());
        assert!(matches!(
            service.northbound("nope"),
            Err(DspError::UnknownInterface { .. })
        ));
    }
}
