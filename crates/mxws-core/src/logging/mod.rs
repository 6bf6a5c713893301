//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the process-wide subscriber (stderr, compact
//!   or JSON lines).
//! - [`capture_logs`] installs a thread-local capturing subscriber for tests.
//!
//! Per-connection context (connection ID, flow name) travels in spans rather
//! than being repeated on every event.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at startup. Subsequent calls are no-ops. `RUST_LOG`, when set,
/// takes precedence over `level`.
///
/// # Arguments
///
/// * `level` - Default filter directive (e.g. `"info"`, `"mxws_server=debug"`).
/// * `json` - Emit newline-delimited JSON instead of the compact format.
pub fn init_subscriber(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails harmlessly if a global subscriber is already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
