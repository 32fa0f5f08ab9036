//! Broadcast cache and runtime context.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DspError, Result};
use crate::message::Message;
use crate::metrics::MetricsRegistry;

/// A northbound sink.
///
/// `send` returns `Ok(true)` when the message was accepted, `Ok(false)` when
/// it was shed due to downstream backpressure, and `Err` on unrecoverable
/// send errors. Implementations must tolerate concurrent `send` calls and an
/// idempotent `stop`.
pub trait Northbound: Send + Sync {
    fn send(&self, msg: &Message) -> Result<bool>;
    fn stop(&self);
    /// Publish sink metrics. Called periodically from the daemon watchdog.
    fn update(&self, _metrics: &MetricsRegistry) {}
}

/// Process-wide collaborators handed to message handlers, plus an opaque
/// application-defined value. Shared reference; never mutated after bind.
#[derive(Clone)]
pub struct Context {
    pub metrics: Arc<MetricsRegistry>,
    pub cache: Arc<Cache>,
    /// Application context, opaque to the runtime.
    pub app: Arc<dyn Any + Send + Sync>,
}

/// A virtual cache, a proxy, that broadcasts messages to all attached
/// northbound interfaces.
///
/// The registry is fixed once the service starts; steady-state `send` runs
/// without any internal locking.
#[derive(Default)]
pub struct Cache {
    interfaces: HashMap<String, Arc<dyn Northbound>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sink under `name`.
    ///
    /// The typed handle is returned so the caller keeps concrete access
    /// without any downcasting later.
    pub fn attach<N: Northbound + 'static>(
        &mut self,
        name: impl Into<String>,
        interface: N,
    ) -> Arc<N> {
        let interface = Arc::new(interface);
        self.interfaces
            .insert(name.into(), interface.clone() as Arc<dyn Northbound>);
        interface
    }

    /// Attach an already shared sink under `name`.
    pub fn attach_shared(&mut self, name: impl Into<String>, interface: Arc<dyn Northbound>) {
        self.interfaces.insert(name.into(), interface);
    }

    /// Broadcast a message to every attached interface.
    ///
    /// Every interface is tried even when an earlier one fails. Returns
    /// `Ok(false)` if any interface shed or refused the message; the first
    /// hard error is returned after the full pass.
    pub fn send(&self, msg: &Message) -> Result<bool> {
        let mut success = true;
        let mut first_error = None;

        for interface in self.interfaces.values() {
            match interface.send(msg) {
                Ok(true) => {}
                Ok(false) => success = false,
                Err(error) => {
                    success = false;
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(success),
        }
    }

    /// Gracefully stop all interfaces.
    pub fn stop(&self) {
        for interface in self.interfaces.values() {
            interface.stop();
        }
    }

    /// Look up an attached interface by name.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Northbound>> {
        self.interfaces
            .get(name)
            .ok_or_else(|| DspError::unknown_interface(name))
    }

    /// Borrow-only iteration, used for periodic metric updates.
    pub fn interfaces(&self) -> impl Iterator<Item = (&str, &Arc<dyn Northbound>)> {
        self.interfaces.iter().map(|(name, iface)| (name.as_str(), iface))
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}
