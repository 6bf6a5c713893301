//! Graceful shutdown coordination via `CancellationToken`.
//!
//! One root token per process. Every stream's token is a child of it, so
//! cancelling the root tears down every stream through the same path a
//! stream uses to tear itself down. Command dispatches are tracked so
//! shutdown can wait for them. Sync pumps are not: one parked in a long-poll
//! exits when that poll returns, after its stream has already closed.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown across all server tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Get a clone of the root cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled by [`shutdown`](Self::shutdown) and cancellable on
    /// its own without affecting the root.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Tracker for background tasks that shutdown should wait for.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything and wait up to `timeout` for tracked tasks.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = self.tracker.close();
        info!(
            task_count = self.tracker.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves on the first SIGINT (ctrl-c) or, on Unix, SIGTERM.
pub fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sig) => {
                    let _ = sig.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => info!("received ctrl-c"),
            () = terminate => info!("received SIGTERM"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        assert!(token.is_cancelled());
    }

    #[test]
    fn multiple_shutdown_calls_idempotent() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn child_tokens_follow_root() {
        let coord = ShutdownCoordinator::new();
        let a = coord.child_token();
        let b = coord.child_token();
        coord.shutdown();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn child_cancel_does_not_touch_root_or_siblings() {
        let coord = ShutdownCoordinator::new();
        let a = coord.child_token();
        let b = coord.child_token();
        a.cancel();
        assert!(!coord.is_shutting_down());
        assert!(!b.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = done.clone();

        let _ = coord.tracker().spawn(async move {
            token.cancelled().await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        coord.graceful_shutdown(None).await;
        assert!(coord.is_shutting_down());
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let _ = coord.tracker().spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        coord
            .graceful_shutdown(Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
    }
}
