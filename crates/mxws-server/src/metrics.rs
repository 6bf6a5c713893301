//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup
/// before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Stream metric names. Command metrics are recorded by `mxws_rpc`.

/// Streams upgraded (counter).
pub const STREAMS_OPENED_TOTAL: &str = "mxws_streams_opened_total";
/// Streams currently open (gauge).
pub const STREAMS_ACTIVE: &str = "mxws_streams_active";
/// Stream lifetime (histogram).
pub const STREAM_DURATION_SECONDS: &str = "mxws_stream_duration_seconds";
/// Initial syncs that failed, so no upgrade happened (counter).
pub const STREAM_SETUP_FAILURES_TOTAL: &str = "mxws_stream_setup_failures_total";
/// Successful sync polls (counter).
pub const SYNC_POLLS_TOTAL: &str = "mxws_sync_polls_total";
/// Sync polls that ended a stream (counter).
pub const SYNC_FAILURES_TOTAL: &str = "mxws_sync_failures_total";
/// Frames written to clients (counter, labels: kind).
pub const FRAMES_SENT_TOTAL: &str = "mxws_frames_sent_total";
