//! TCP server.
//!
//! A single acceptor binds `host:port` and spawns one task per accepted
//! connection. Each connection reads into its own buffer and drains it
//! through the handler; shutdown is cooperative via a watch channel observed
//! at every accept and read boundary.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{info, warn};

use super::handler::{ConnectionInfo, Handler, HandlerFactory};
use crate::error::Result;

/// Initial capacity of a per-connection read buffer.
const READ_BUFFER_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    pub host: String,
    pub port: u16,
}

/// Server-scoped gauges, shared with every connection task.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Currently open connections.
    pub connections: AtomicU64,
    /// Sum of bytes currently buffered across connections.
    pub buffer_size: AtomicU64,
    /// Sum of buffer capacities across connections.
    pub buffer_capacity: AtomicU64,
}

pub struct Server {
    config: NetConfig,
    factory: Arc<dyn HandlerFactory>,
    metrics: Arc<ServerMetrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    pub fn new(config: NetConfig, factory: Arc<dyn HandlerFactory>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            factory,
            metrics: Arc::new(ServerMetrics::default()),
            shutdown_tx,
        }
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Run the accept loop. Blocking; returns after `stop`.
    pub fn run(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("dsp-tcp")
            .enable_io()
            .build()?;

        runtime.block_on(self.accept_loop())
    }

    /// Signal the acceptor and every connection task to stop. Idempotent and
    /// callable from any thread.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn accept_loop(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("TCP server bound to {}", bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let factory = self.factory.clone();
                            let metrics = self.metrics.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                handle_connection(socket, addr, factory, metrics, shutdown_rx).await;
                            });
                        }
                        Err(e) => {
                            warn!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("TCP server received shutdown signal");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    addr: SocketAddr,
    factory: Arc<dyn HandlerFactory>,
    metrics: Arc<ServerMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let info = ConnectionInfo {
        address: addr.ip().to_string(),
        port: addr.port(),
    };

    let mut handler = factory.create();
    handler.on_connection_init(&info);

    metrics.connections.fetch_add(1, Ordering::Relaxed);
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    let mut tracked_size = 0u64;
    let mut tracked_capacity = 0u64;
    track(&metrics.buffer_capacity, &mut tracked_capacity, buffer.capacity() as u64);

    loop {
        tokio::select! {
            read = socket.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => {
                        handler.on_eof(&info);
                        break;
                    }
                    Ok(_) => {
                        if let Err(error) = drain(handler.as_mut(), &mut buffer) {
                            handler.on_error(&error, &info);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Error in TCP connection {}: {}", info, e);
                        break;
                    }
                }
                track(&metrics.buffer_size, &mut tracked_size, buffer.len() as u64);
                track(&metrics.buffer_capacity, &mut tracked_capacity, buffer.capacity() as u64);
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    track(&metrics.buffer_size, &mut tracked_size, 0);
    track(&metrics.buffer_capacity, &mut tracked_capacity, 0);
    metrics.connections.fetch_sub(1, Ordering::Relaxed);
}

/// Move a per-connection contribution inside a shared gauge.
fn track(gauge: &AtomicU64, tracked: &mut u64, current: u64) {
    if current >= *tracked {
        gauge.fetch_add(current - *tracked, Ordering::Relaxed);
    } else {
        gauge.fetch_sub(*tracked - current, Ordering::Relaxed);
    }
    *tracked = current;
}

/// Drain complete frames from the front of the buffer.
///
/// Invokes `process` until it reports a short read or the buffer is empty.
/// Partial frames stay buffered for the next read.
pub(crate) fn drain(handler: &mut dyn Handler, buffer: &mut BytesMut) -> Result<()> {
    while !buffer.is_empty() {
        let consumed = handler.process(&buffer[..])?;
        if consumed == 0 {
            break;
        }
        buffer.advance(consumed);
    }
    Ok(())
}
