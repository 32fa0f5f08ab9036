//! Per-connection handler contract.

use std::fmt;

use crate::cache::Context;
use crate::error::{DspError, Result};

/// Peer endpoint of an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Protocol handler owned by a single connection.
///
/// Handlers own no state shared with other connections.
pub trait Handler: Send {
    /// Consume at most one message from the front of `data`.
    ///
    /// Return 0 when the buffer does not yet hold a full message; the server
    /// keeps the bytes buffered and calls again after the next read.
    /// Otherwise process one message and return its framed length. The
    /// server drains the buffer by re-invoking until 0 or empty.
    ///
    /// An `Err` terminates the connection after `on_error`.
    fn process(&mut self, data: &[u8]) -> Result<usize>;

    fn on_connection_init(&mut self, _info: &ConnectionInfo) {}
    fn on_eof(&mut self, _info: &ConnectionInfo) {}
    fn on_error(&mut self, _error: &DspError, _info: &ConnectionInfo) {}
}

/// Creates one handler per accepted connection.
pub trait HandlerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Handler>;

    /// Bind runtime context. Called once before the server starts.
    fn bind(&self, _ctx: Context) {}
}
