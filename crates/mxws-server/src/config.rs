//! Server configuration.

use std::time::Duration;

use mxws_settings::MxwsSettings;

/// Configuration for the HTTP listener.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Per-stream settings.
    pub stream: StreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            stream: StreamConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &MxwsSettings) -> Self {
        let ws = &settings.websocket;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            stream: StreamConfig {
                ping_interval: ws.ping_interval(),
                pong_wait: ws.pong_wait(),
                write_wait: ws.write_wait(),
                max_message_bytes: ws.max_message_bytes,
                send_queue_capacity: ws.send_queue_capacity,
                subprotocol: ws.subprotocol.clone(),
                sync_timeout: settings.upstream.sync_timeout(),
            },
        }
    }
}

/// Settings that govern a single stream.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Period between Ping frames.
    pub ping_interval: Duration,
    /// Read deadline, renewed on every Pong.
    pub pong_wait: Duration,
    /// Deadline for writing one frame.
    pub write_wait: Duration,
    /// Largest inbound message accepted.
    pub max_message_bytes: usize,
    /// Outbound queue bound.
    pub send_queue_capacity: usize,
    /// Sub-protocol selected on upgrade.
    pub subprotocol: String,
    /// Server-side wait for every long-poll after the first.
    pub sync_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_bytes: 1024,
            send_queue_capacity: 256,
            subprotocol: "m.json".into(),
            sync_timeout: Duration::from_secs(60),
        }
    }
}
