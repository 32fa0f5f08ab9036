//! Metrics registry.
//!
//! A thin facade over a Prometheus registry. Names register on first use:
//! `increment` registers a counter family, `set` a gauge family. Referring to
//! the same name as both kinds is a programming error; the second
//! registration fails and is logged, the write is dropped.
//!
//! Exposition is delegated: `handle` returns the underlying registry for
//! whatever collector endpoint the embedding process runs.

use std::collections::HashMap;

use parking_lot::Mutex;
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};
use tracing::error;

/// Label set for one observation, as borrowed pairs.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

pub struct MetricsRegistry {
    registry: Registry,
    counters: Mutex<HashMap<String, IntCounterVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// Increment the counter `name` by `value`.
    ///
    /// The label key set of the first call fixes the family; later calls
    /// must use the same keys.
    pub fn increment(&self, name: &str, value: u64, labels: Labels<'_>) {
        let (names, values) = split_labels(labels);
        let Some(family) = self.counter_family(name, &names) else {
            return;
        };
        match family.get_metric_with_label_values(&values) {
            Ok(counter) => counter.inc_by(value),
            Err(e) => error!(metric = name, "Label mismatch on counter: {}", e),
        }
    }

    /// Set the gauge `name` to `value`.
    pub fn set(&self, name: &str, value: f64, labels: Labels<'_>) {
        let (names, values) = split_labels(labels);
        let Some(family) = self.gauge_family(name, &names) else {
            return;
        };
        match family.get_metric_with_label_values(&values) {
            Ok(gauge) => gauge.set(value),
            Err(e) => error!(metric = name, "Label mismatch on gauge: {}", e),
        }
    }

    /// For binding with a Prometheus exposition endpoint.
    pub fn handle(&self) -> Registry {
        self.registry.clone()
    }

    fn counter_family(&self, name: &str, label_names: &[&str]) -> Option<IntCounterVec> {
        let mut counters = self.counters.lock();
        if let Some(family) = counters.get(name) {
            return Some(family.clone());
        }

        let family = match IntCounterVec::new(Opts::new(name, name), label_names) {
            Ok(family) => family,
            Err(e) => {
                error!(metric = name, "Failed to create counter: {}", e);
                return None;
            }
        };
        if let Err(e) = self.registry.register(Box::new(family.clone())) {
            error!(metric = name, "Failed to register counter: {}", e);
            return None;
        }
        counters.insert(name.to_string(), family.clone());
        Some(family)
    }

    fn gauge_family(&self, name: &str, label_names: &[&str]) -> Option<GaugeVec> {
        let mut gauges = self.gauges.lock();
        if let Some(family) = gauges.get(name) {
            return Some(family.clone());
        }

        let family = match GaugeVec::new(Opts::new(name, name), label_names) {
            Ok(family) => family,
            Err(e) => {
                error!(metric = name, "Failed to create gauge: {}", e);
                return None;
            }
        };
        if let Err(e) = self.registry.register(Box::new(family.clone())) {
            error!(metric = name, "Failed to register gauge: {}", e);
            return None;
        }
        gauges.insert(name.to_string(), family.clone());
        Some(family)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort label pairs by key so the family sees a stable label-name order.
fn split_labels<'a>(labels: Labels<'a>) -> (Vec<&'a str>, Vec<&'a str>) {
    let mut sorted: Vec<(&str, &str)> = labels.to_vec();
    sorted.sort_by_key(|(k, _)| *k);
    (
        sorted.iter().map(|(k, _)| *k).collect(),
        sorted.iter().map(|(_, v)| *v).collect(),
    )
}
