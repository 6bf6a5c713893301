//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial: missing fields keep their compiled default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 8009 },
///   "upstream": { "baseUrl": "https://matrix.example.org/" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MxwsSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Homeserver connection settings.
    pub upstream: UpstreamSettings,
    /// Per-stream transport settings.
    pub websocket: WebSocketSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl MxwsSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let ws = &self.websocket;
        if ws.ping_interval_ms >= ws.pong_wait_ms {
            return Err(SettingsError::InvalidValue(format!(
                "websocket.pingIntervalMs ({}) must be shorter than websocket.pongWaitMs ({})",
                ws.ping_interval_ms, ws.pong_wait_ms
            )));
        }
        if ws.ping_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.pingIntervalMs must be non-zero".into(),
            ));
        }
        if ws.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.sendQueueCapacity must be non-zero".into(),
            ));
        }
        if ws.subprotocol.is_empty() {
            return Err(SettingsError::InvalidValue(
                "websocket.subprotocol must not be empty".into(),
            ));
        }
        if self.upstream.base_url.is_empty() {
            return Err(SettingsError::InvalidValue(
                "upstream.baseUrl must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// TCP port to listen on.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8009,
        }
    }
}

/// Homeserver connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Base URL of the homeserver client API (e.g. `http://localhost:8008/`).
    pub base_url: String,
    /// Server-side wait passed as `timeout` on every long-poll after the first.
    pub sync_timeout_ms: u64,
    /// Client-side deadline for non-sync calls, and the grace added on top of
    /// `sync_timeout_ms` for long-polls.
    pub request_timeout_ms: u64,
}

impl UpstreamSettings {
    /// Long-poll wait as a [`Duration`].
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8008/".to_string(),
            sync_timeout_ms: 60_000,
            request_timeout_ms: 30_000,
        }
    }
}

/// Per-stream transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Period between server-initiated Ping frames. Must be below `pong_wait_ms`.
    pub ping_interval_ms: u64,
    /// Idle read deadline, renewed whenever a Pong arrives.
    pub pong_wait_ms: u64,
    /// Deadline for writing a single frame.
    pub write_wait_ms: u64,
    /// Maximum inbound message size in bytes.
    pub max_message_bytes: usize,
    /// Capacity of the per-connection outbound queue.
    pub send_queue_capacity: usize,
    /// The single application sub-protocol offered on upgrade.
    pub subprotocol: String,
}

impl WebSocketSettings {
    /// Ping period as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Read deadline as a [`Duration`].
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Write deadline as a [`Duration`].
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 54_000,
            pong_wait_ms: 60_000,
            write_wait_ms: 10_000,
            max_message_bytes: 1024,
            send_queue_capacity: 256,
            subprotocol: "m.json".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of the compact text format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
