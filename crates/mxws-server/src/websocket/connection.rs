//! Per-stream identity, lifecycle state and the open-stream counter.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::metrics::{STREAM_DURATION_SECONDS, STREAMS_ACTIVE, STREAMS_OPENED_TOTAL};

/// Lifecycle of one stream.
///
/// Only moves forward: `SettingUp -> Streaming -> Draining -> Closed`.
/// A failed setup goes straight to `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Performing the initial immediate sync.
    SettingUp,
    /// Reader, writer and sync pump running.
    Streaming,
    /// Shutdown signalled; flows are exiting.
    Draining,
    /// Transport closed.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SettingUp => "setting_up",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Closed => "closed",
        })
    }
}

/// One accepted stream.
pub struct Connection {
    /// Unique connection ID (UUID v7, time ordered).
    pub id: Uuid,
    /// When the request arrived.
    pub started_at: Instant,
    state: Mutex<ConnectionState>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Create a connection in `SettingUp` whose shutdown signal is `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            id: Uuid::now_v7(),
            started_at: Instant::now(),
            state: Mutex::new(ConnectionState::SettingUp),
            shutdown,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move forward to `next`. Backward moves are ignored.
    pub fn advance(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if next > *state {
            debug!(conn_id = %self.id, from = %*state, to = %next, "connection state");
            *state = next;
        }
    }

    /// The stream's shared shutdown signal.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Fire the shutdown signal. Safe to call from any flow, any number of times.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.advance(ConnectionState::Draining);
    }
}

/// Count of streams currently open.
#[derive(Clone, Default)]
pub struct ActiveStreams {
    count: Arc<AtomicUsize>,
}

impl ActiveStreams {
    /// Create a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams currently open.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Register an open stream; the count drops when the guard does.
    pub fn open(&self) -> StreamGuard {
        let _ = self.count.fetch_add(1, Ordering::Relaxed);
        counter!(STREAMS_OPENED_TOTAL).increment(1);
        gauge!(STREAMS_ACTIVE).increment(1.0);
        StreamGuard {
            count: self.count.clone(),
            opened_at: Instant::now(),
        }
    }
}

/// Keeps a stream counted in [`ActiveStreams`] while alive.
pub struct StreamGuard {
    count: Arc<AtomicUsize>,
    opened_at: Instant,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let _ = self.count.fetch_sub(1, Ordering::Relaxed);
        gauge!(STREAMS_ACTIVE).decrement(1.0);
        histogram!(STREAM_DURATION_SECONDS).record(self.opened_at.elapsed().as_secs_f64());
    }
}
