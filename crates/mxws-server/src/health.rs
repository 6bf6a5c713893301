//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Proxy version.
    pub version: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Streams currently open.
    pub active_streams: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, active_streams: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_streams,
    }
}
