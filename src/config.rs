//! Service configuration.
//!
//! The runtime is configured from a YAML document whose path is taken from
//! the `DSP_CONFIG` environment variable. The interface sections resolve
//! into tagged unions matched by the service builders; unknown interface
//! types are fatal at startup.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{DspError, Result};
use crate::tcp::NetConfig;

/// Environment variable holding the configuration file path.
pub const CONFIG_ENV: &str = "DSP_CONFIG";

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;
const DEFAULT_HOST: &str = "0.0.0.0";

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub dsp: DspConfig,
    /// Application-owned section, opaque to the runtime.
    #[serde(default)]
    pub app: Option<AppSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DspConfig {
    /// Daemon tick interval in seconds.
    #[serde(rename = "daemon-interval")]
    pub daemon_interval: u64,
    pub interfaces: InterfacesSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfacesSection {
    pub southbound: SouthboundSection,
    pub northbound: NorthboundSection,
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SouthboundSection {
    #[serde(rename = "type")]
    pub kind: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub address: Option<String>,
    pub groupid: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(rename = "batchSize")]
    pub batch_size: Option<usize>,
    #[serde(rename = "pollTimeoutMs")]
    pub poll_timeout_ms: Option<u64>,
    #[serde(rename = "statistics-interval-ms")]
    pub statistics_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NorthboundSection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
    pub name: Option<String>,
    pub address: Option<String>,
    #[serde(rename = "statistics-interval-ms")]
    pub statistics_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    #[serde(default)]
    pub enabled: bool,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub handler: Option<String>,
    pub topic: Option<String>,
}

/// Resolved southbound interface configuration.
#[derive(Debug, Clone)]
pub enum SouthboundKind {
    Tcp(NetConfig),
    Kafka(KafkaSouthboundSettings),
    Custom,
}

#[derive(Debug, Clone)]
pub struct KafkaSouthboundSettings {
    pub address: String,
    pub group_id: String,
    pub topics: Vec<String>,
    pub batch_size: usize,
    pub poll_timeout: Duration,
    pub statistics_interval_ms: Option<u64>,
}

/// Resolved northbound interface configuration.
#[derive(Debug, Clone)]
pub enum NorthboundKind {
    Kafka(KafkaNorthboundSettings),
    Custom,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct KafkaNorthboundSettings {
    pub name: String,
    pub address: String,
    pub statistics_interval_ms: Option<u64>,
}

impl ConfigFile {
    /// Load from the path named by `DSP_CONFIG`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).map_err(|_| {
            DspError::invalid_config(CONFIG_ENV, "environment variable is not set")
        })?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| DspError::invalid_config("dsp", e.to_string()))
    }
}

impl DspConfig {
    pub fn daemon_interval(&self) -> Duration {
        Duration::from_secs(self.daemon_interval)
    }

    /// Resolve the southbound section into its tagged form.
    pub fn southbound(&self) -> Result<SouthboundKind> {
        let section = &self.interfaces.southbound;
        match section.kind.as_str() {
            "tcp" => {
                let port = section.port.ok_or_else(|| {
                    DspError::invalid_config("interfaces.southbound.port", "missing value")
                })?;
                let host = section
                    .host
                    .clone()
                    .unwrap_or_else(|| DEFAULT_HOST.to_string());
                Ok(SouthboundKind::Tcp(NetConfig { host, port }))
            }
            "kafka" => {
                let address = section.address.clone().ok_or_else(|| {
                    DspError::invalid_config("interfaces.southbound.address", "missing value")
                })?;
                let group_id = section.groupid.clone().ok_or_else(|| {
                    DspError::invalid_config("interfaces.southbound.groupid", "missing value")
                })?;
                if section.topics.is_empty() {
                    return Err(DspError::invalid_config(
                        "interfaces.southbound.topics",
                        "at least one topic is required",
                    ));
                }
                Ok(SouthboundKind::Kafka(KafkaSouthboundSettings {
                    address,
                    group_id,
                    topics: section.topics.clone(),
                    batch_size: section.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                    poll_timeout: Duration::from_millis(
                        section.poll_timeout_ms.unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
                    ),
                    statistics_interval_ms: section.statistics_interval_ms,
                }))
            }
            "custom" => Ok(SouthboundKind::Custom),
            other => Err(DspError::invalid_config(
                "interfaces.southbound.type",
                format!("unsupported interface type: {}", other),
            )),
        }
    }

    /// Resolve the northbound section into its tagged form.
    pub fn northbound(&self) -> Result<NorthboundKind> {
        let section = &self.interfaces.northbound;
        match section.kind.as_str() {
            "kafka" => {
                if !section.enabled {
                    return Ok(NorthboundKind::Disabled);
                }
                let name = section.name.clone().ok_or_else(|| {
                    DspError::invalid_config("interfaces.northbound.name", "missing value")
                })?;
                let address = section.address.clone().ok_or_else(|| {
                    DspError::invalid_config("interfaces.northbound.address", "missing value")
                })?;
                Ok(NorthboundKind::Kafka(KafkaNorthboundSettings {
                    name,
                    address,
                    statistics_interval_ms: section.statistics_interval_ms,
                }))
            }
            "custom" => Ok(NorthboundKind::Custom),
            other => Err(DspError::invalid_config(
                "interfaces.northbound.type",
                format!("unsupported interface type: {}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
dsp:
  daemon-interval: 1
  interfaces:
    southbound:
      type: tcp
      port: 7200
    northbound:
      type: kafka
      enabled: true
      name: main-nb
      address: localhost:9092
      statistics-interval-ms: 1000
    metrics:
      enabled: true
      port: 9464
app:
  handler: telemetry
  topic: t1
"#;

    #[test]
    fn test_parse_full_config() {
        let config = ConfigFile::from_yaml(FULL_CONFIG).unwrap();
        assert_eq!(config.dsp.daemon_interval(), Duration::from_secs(1));

        match config.dsp.southbound().unwrap() {
            SouthboundKind::Tcp(net) => {
                assert_eq!(net.host, "0.0.0.0");
                assert_eq!(net.port, 7200);
            }
            other => panic!("expected tcp southbound, got {:?}", other),
        }

        match config.dsp.northbound().unwrap() {
            NorthboundKind::Kafka(settings) => {
                assert_eq!(settings.name, "main-nb");
                assert_eq!(settings.address, "localhost:9092");
                assert_eq!(settings.statistics_interval_ms, Some(1000));
            }
            other => panic!("expected kafka northbound, got {:?}", other),
        }

        let app = config.app.unwrap();
        assert_eq!(app.handler.as_deref(), Some("telemetry"));
        assert_eq!(app.topic.as_deref(), Some("t1"));
        assert!(config.dsp.interfaces.metrics.enabled);
        assert_eq!(config.dsp.interfaces.metrics.port, Some(9464));
    }

    #[test]
    fn test_kafka_southbound_defaults() {
        let config = ConfigFile::from_yaml(
            r#"
dsp:
  daemon-interval: 1
  interfaces:
    southbound:
      type: kafka
      address: localhost:9092
      groupid: dsp-group
      topics: [dev-test]
    northbound:
      type: kafka
      enabled: false
    metrics:
      enabled: false
"#,
        )
        .unwrap();

        match config.dsp.southbound().unwrap() {
            SouthboundKind::Kafka(settings) => {
                assert_eq!(settings.group_id, "dsp-group");
                assert_eq!(settings.topics, vec!["dev-test".to_string()]);
                assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
                assert_eq!(settings.poll_timeout, Duration::from_millis(1000));
            }
            other => panic!("expected kafka southbound, got {:?}", other),
        }

        assert!(matches!(
            config.dsp.northbound().unwrap(),
            NorthboundKind::Disabled
        ));
    }

    #[test]
    fn test_unsupported_interface_type_is_fatal() {
        let config = ConfigFile::from_yaml(
            r#"
dsp:
  daemon-interval: 1
  interfaces:
    southbound:
      type: carrier-pigeon
    northbound:
      type: kafka
      enabled: false
    metrics:
      enabled: false
"#,
        )
        .unwrap();

        assert!(matches!(
            config.dsp.southbound(),
            Err(DspError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_missing_tcp_port_is_fatal() {
        let config = ConfigFile::from_yaml(
            r#"
dsp:
  daemon-interval: 1
  interfaces:
    southbound:
      type: tcp
    northbound:
      type: custom
    metrics:
      enabled: false
"#,
        )
        .unwrap();

        assert!(matches!(
            config.dsp.southbound(),
            Err(DspError::InvalidConfig { .. })
        ));
        assert!(matches!(
            config.dsp.northbound().unwrap(),
            NorthboundKind::Custom
        ));
    }

    #[test]
    fn test_malformed_yaml_is_fatal() {
        assert!(matches!(
            ConfigFile::from_yaml("dsp: ["),
            Err(DspError::InvalidConfig { .. })
        ));
    }
}
