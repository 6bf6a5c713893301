//! The sync pump: long-poll forever, forward each body.

use std::sync::Arc;

use metrics::counter;
use mxws_upstream::SyncSource;
use tracing::{debug, warn};

use super::connection::Connection;
use super::outbound::{CLOSE_INTERNAL_ERROR, Outbound, OutboundMessage};
use crate::metrics::{SYNC_FAILURES_TOTAL, SYNC_POLLS_TOTAL};

/// Poll `source` and enqueue each body until shutdown.
///
/// Shutdown is checked between polls; a poll already in flight runs to
/// completion. A failed poll enqueues a 1011 close directive and fires
/// shutdown.
pub(crate) async fn run_sync_pump<S>(mut source: S, outbound: Outbound, conn: Arc<Connection>)
where
    S: SyncSource,
{
    let token = conn.shutdown_token().clone();
    debug!("sync pump started");

    while !token.is_cancelled() {
        match source.poll().await {
            Ok(body) => {
                counter!(SYNC_POLLS_TOTAL).increment(1);
                if !outbound.send_data(body).await {
                    break;
                }
            }
            Err(e) => {
                counter!(SYNC_FAILURES_TOTAL).increment(1);
                warn!(error = %e, "sync failed, closing stream");
                let close = OutboundMessage::Close {
                    code: CLOSE_INTERNAL_ERROR,
                    reason: e.close_reason(),
                };
                let _ = outbound.send(close).await;
                conn.shutdown();
                break;
            }
        }
    }

    debug!("sync pump stopped");
}
