//! TCP connection handlers for the telemetry protocol.
//!
//! Two handlers ship with the runtime: `telemetry` decodes typed frames and
//! routes them by message properties, `passthrough` forwards frame bodies to
//! a fixed topic. Applications with other protocols implement
//! `tcp::Handler` themselves.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{error, info};

use crate::cache::Context;
use crate::error::{DspError, Result};
use crate::message::{Message, Properties};
use crate::router::Router;
use crate::stat::Statistics;
use crate::tcp::{ConnectionInfo, Handler, HandlerFactory};

pub mod wire {
    //! Length-prefixed telemetry wire format. All integers little-endian.
    //!
    //! ```text
    //! message   ::= u16 length | u16 type | bytes[length - 4] body
    //! heartbeat ::= u64 client_id | u64 sequence | u64 timestamp_unix_ns
    //! ```
    //!
    //! The length prefix counts itself. The views below assume the caller
    //! has already verified the slice is long enough.

    /// Size of the length prefix.
    pub const LENGTH_PREFIX_SIZE: usize = 2;
    /// Length and type prefix of a telemetry frame.
    pub const TELEMETRY_HEADER_SIZE: usize = 4;

    pub const TYPE_HEARTBEAT: u16 = 0;
    pub const TYPE_DYN_MESSAGE: u16 = 1;

    fn u16_at(data: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([data[offset], data[offset + 1]])
    }

    fn u64_at(data: &[u8], offset: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    }

    /// An opaque message prefixed with a 2-byte length field.
    #[derive(Clone, Copy)]
    pub struct Frame<'a> {
        data: &'a [u8],
    }

    impl<'a> Frame<'a> {
        pub fn new(data: &'a [u8]) -> Self {
            Self { data }
        }

        /// Framed length, including the prefix itself.
        pub fn length(&self) -> usize {
            u16_at(self.data, 0) as usize
        }

        pub fn payload(&self) -> &'a [u8] {
            &self.data[LENGTH_PREFIX_SIZE..self.length()]
        }
    }

    /// A typed telemetry frame.
    #[derive(Clone, Copy)]
    pub struct Telemetry<'a> {
        frame: Frame<'a>,
    }

    impl<'a> Telemetry<'a> {
        pub fn new(data: &'a [u8]) -> Self {
            Self {
                frame: Frame::new(data),
            }
        }

        pub fn length(&self) -> usize {
            self.frame.length()
        }

        pub fn kind(&self) -> u16 {
            u16_at(self.frame.data, LENGTH_PREFIX_SIZE)
        }

        pub fn body(&self) -> &'a [u8] {
            &self.frame.data[TELEMETRY_HEADER_SIZE..self.length()]
        }
    }

    /// Heartbeat body view.
    #[derive(Clone, Copy)]
    pub struct Heartbeat<'a> {
        body: &'a [u8],
    }

    impl<'a> Heartbeat<'a> {
        pub const SIZE: usize = 24;

        pub fn new(body: &'a [u8]) -> Self {
            Self { body }
        }

        pub fn client_id(&self) -> u64 {
            u64_at(self.body, 0)
        }

        pub fn sequence(&self) -> u64 {
            u64_at(self.body, 8)
        }

        pub fn timestamp(&self) -> u64 {
            u64_at(self.body, 16)
        }
    }
}

/// Application context shared by the connection handlers.
pub struct AppContext {
    pub router: Router,
    /// Destination topic for the passthrough handler.
    pub topic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Telemetry,
    Passthrough,
}

impl HandlerKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "telemetry" => Ok(HandlerKind::Telemetry),
            "passthrough" => Ok(HandlerKind::Passthrough),
            other => Err(DspError::invalid_config(
                "app.handler",
                format!("invalid handler type: {}", other),
            )),
        }
    }
}

/// Handler factory with once-bound runtime context.
pub struct AppHandlerFactory {
    kind: HandlerKind,
    ctx: OnceCell<Context>,
}

impl AppHandlerFactory {
    pub fn new(kind: HandlerKind) -> Self {
        Self {
            kind,
            ctx: OnceCell::new(),
        }
    }
}

impl HandlerFactory for AppHandlerFactory {
    fn bind(&self, ctx: Context) {
        if self.ctx.set(ctx).is_err() {
            tracing::warn!("Handler factory context is already bound");
        }
    }

    fn create(&self) -> Box<dyn Handler> {
        let ctx = self
            .ctx
            .get()
            .cloned()
            .expect("context is bound before the server starts");
        let app = ctx
            .app
            .clone()
            .downcast::<AppContext>()
            .ok()
            .expect("application context is an AppContext");

        match self.kind {
            HandlerKind::Telemetry => Box::new(TelemetryHandler::new(ctx, app)),
            HandlerKind::Passthrough => Box::new(PassthroughHandler::new(ctx, app)),
        }
    }
}

/// Decodes telemetry frames and routes them by message properties.
pub struct TelemetryHandler {
    ctx: Context,
    app: Arc<AppContext>,
    stats: Statistics,
}

impl TelemetryHandler {
    pub fn new(ctx: Context, app: Arc<AppContext>) -> Self {
        Self {
            ctx,
            app,
            stats: Statistics::new(),
        }
    }

    fn process_heartbeat(&mut self, heartbeat: wire::Heartbeat<'_>) {
        let payload = format!(
            "Client ID: {} Sequence : {} Unix epoch: {}",
            heartbeat.client_id(),
            heartbeat.sequence(),
            heartbeat.timestamp()
        );

        let msg = Message {
            key: heartbeat.client_id().to_string().into_bytes(),
            subject: String::new(),
            properties: Properties::from([("type".to_string(), "heartbeat".to_string())]),
            payload: payload.into_bytes(),
        };

        self.route_and_send(&msg);
    }

    fn process_dyn_message(&mut self, body: &[u8]) {
        let msg = Message {
            key: Vec::new(),
            subject: String::new(),
            properties: Properties::new(),
            payload: body.to_vec(),
        };

        self.route_and_send(&msg);
    }

    /// Send a message everywhere the routing configuration points.
    ///
    /// The following metrics are in use:
    /// - processed messages and bytes (labels: subject)
    /// - dropped messages and bytes (labels: drop_type[load_shed,not_needed])
    fn route_and_send(&mut self, msg: &Message) {
        let routed = self.app.router.route(msg);

        if routed.is_empty() {
            self.ctx
                .metrics
                .increment("drop_messages_total", 1, &[("drop_type", "not_needed")]);
            self.ctx.metrics.increment(
                "drop_bytes_total",
                msg.payload.len() as u64,
                &[("drop_type", "not_needed")],
            );
            return;
        }

        for out in &routed {
            match self.ctx.cache.send(out) {
                Ok(true) => {
                    self.ctx.metrics.increment(
                        "process_messages_total",
                        1,
                        &[("subject", out.subject.as_str())],
                    );
                    self.ctx.metrics.increment(
                        "process_bytes_total",
                        out.payload.len() as u64,
                        &[("subject", out.subject.as_str())],
                    );
                }
                Ok(false) => {
                    self.ctx.metrics.increment(
                        "drop_messages_total",
                        1,
                        &[("drop_type", "load_shed")],
                    );
                    self.ctx.metrics.increment(
                        "drop_bytes_total",
                        out.payload.len() as u64,
                        &[("drop_type", "load_shed")],
                    );
                }
                Err(e) => {
                    // Unrecoverable send errors must not kill the connection.
                    error!("Failed to send message to '{}': {}", out.subject, e);
                }
            }
        }
    }
}

impl Handler for TelemetryHandler {
    fn process(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() < wire::TELEMETRY_HEADER_SIZE {
            return Ok(0);
        }

        let frame = wire::Telemetry::new(data);
        let length = frame.length();
        if length < wire::TELEMETRY_HEADER_SIZE {
            return Err(DspError::handler(format!(
                "Frame length {} below telemetry header size",
                length
            )));
        }
        if data.len() < length {
            return Ok(0);
        }

        self.ctx.metrics.increment("receive_messages_total", 1, &[]);
        self.ctx
            .metrics
            .increment("receive_bytes_total", length as u64, &[]);

        match frame.kind() {
            wire::TYPE_HEARTBEAT => {
                if frame.body().len() < wire::Heartbeat::SIZE {
                    return Err(DspError::handler("Truncated heartbeat body"));
                }
                self.process_heartbeat(wire::Heartbeat::new(frame.body()));
            }
            wire::TYPE_DYN_MESSAGE => self.process_dyn_message(frame.body()),
            other => {
                return Err(DspError::handler(format!(
                    "Unsupported message type: {}",
                    other
                )))
            }
        }

        self.stats.observe(length, 1);
        Ok(length)
    }

    fn on_connection_init(&mut self, info: &ConnectionInfo) {
        info!("Client connected: {}", info);
        self.stats.reset_uptime();
    }

    fn on_eof(&mut self, info: &ConnectionInfo) {
        info!("Client disconnected: {}", info);
        info!("{}", self.stats.summary());
    }

    fn on_error(&mut self, error: &DspError, info: &ConnectionInfo) {
        error!("Unhandled error in TCP handler for {}: {}", info, error);
    }
}

/// Forwards frame bodies unchanged to the configured topic.
pub struct PassthroughHandler {
    ctx: Context,
    app: Arc<AppContext>,
    stats: Statistics,
}

impl PassthroughHandler {
    pub fn new(ctx: Context, app: Arc<AppContext>) -> Self {
        Self {
            ctx,
            app,
            stats: Statistics::new(),
        }
    }
}

impl Handler for PassthroughHandler {
    fn process(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() < wire::LENGTH_PREFIX_SIZE {
            return Ok(0);
        }

        let frame = wire::Frame::new(data);
        let length = frame.length();
        if length < wire::LENGTH_PREFIX_SIZE {
            return Err(DspError::handler(format!(
                "Frame length {} below prefix size",
                length
            )));
        }
        if data.len() < length {
            return Ok(0);
        }

        self.ctx.metrics.increment("receive_messages_total", 1, &[]);
        self.ctx
            .metrics
            .increment("receive_bytes_total", length as u64, &[]);

        let msg = Message {
            key: Vec::new(),
            subject: self.app.topic.clone(),
            properties: Properties::new(),
            payload: frame.payload().to_vec(),
        };

        match self.ctx.cache.send(&msg) {
            Ok(true) => {}
            Ok(false) => {
                self.ctx
                    .metrics
                    .increment("drop_messages_total", 1, &[("drop_type", "load_shed")]);
                self.ctx.metrics.increment(
                    "drop_bytes_total",
                    msg.payload.len() as u64,
                    &[("drop_type", "load_shed")],
                );
            }
            Err(e) => {
                error!("Failed to send message to '{}': {}", msg.subject, e);
            }
        }

        self.stats.observe(length, 1);
        Ok(length)
    }

    fn on_connection_init(&mut self, info: &ConnectionInfo) {
        info!("Client connected: {}", info);
        self.stats.reset_uptime();
    }

    fn on_eof(&mut self, info: &ConnectionInfo) {
        info!("Client disconnected: {}", info);
        info!("{}", self.stats.summary());
    }

    fn on_error(&mut self, error: &DspError, info: &ConnectionInfo) {
        error!("Unhandled error in TCP handler for {}: {}", info, error);
    }
}
