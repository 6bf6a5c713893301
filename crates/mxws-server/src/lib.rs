//! # mxws-server
//!
//! Axum HTTP + `WebSocket` front end of the proxy.
//!
//! - `GET /stream`: initial sync, then upgrade to a long-lived stream
//! - Per-stream writer, reader and sync pump sharing one shutdown signal
//! - `GET /health` and `GET /metrics`
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{ServerConfig, StreamConfig};
pub use server::MxwsServer;
pub use shutdown::{ShutdownCoordinator, shutdown_signal};
