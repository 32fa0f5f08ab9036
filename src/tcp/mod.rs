//! TCP server with a framed per-connection handler contract.

pub mod handler;
pub mod server;

pub use handler::{ConnectionInfo, Handler, HandlerFactory};
pub use server::{NetConfig, Server, ServerMetrics};
