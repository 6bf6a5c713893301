//! The reader flow: inbound frames, read deadline, command dispatch.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use mxws_rpc::{MethodRegistry, RpcContext, handle_message};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, warn};

use super::connection::Connection;
use super::outbound::Outbound;
use crate::config::StreamConfig;

/// Runs each inbound command on its own task and enqueues the response.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) registry: Arc<MethodRegistry>,
    pub(crate) ctx: RpcContext,
    pub(crate) outbound: Outbound,
    pub(crate) tracker: TaskTracker,
}

impl Dispatcher {
    fn spawn(&self, frame: String) {
        let this = self.clone();
        let _ = self.tracker.spawn(
            async move {
                let result = handle_message(&frame, &this.registry, &this.ctx).await;
                if result.response_json.is_empty() {
                    return;
                }
                if !this.outbound.send_data(result.response_json).await {
                    debug!(method = result.method.as_deref(), "response dropped, stream closing");
                }
            }
            .instrument(tracing::Span::current()),
        );
    }
}

/// Read frames until the peer goes away, the read deadline passes, or the
/// stream shuts down. Only a Pong renews the deadline. Fires shutdown on exit.
pub(crate) async fn run_reader<R, E>(
    mut stream: R,
    conn: &Connection,
    config: &StreamConfig,
    dispatcher: &Dispatcher,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let token = conn.shutdown_token().clone();
    let mut deadline = Instant::now() + config.pong_wait;

    debug!("reader started");
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                warn!(pong_wait = ?config.pong_wait, "read deadline exceeded");
                break;
            }
            Ok(None) => {
                debug!("client disconnected");
                break;
            }
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => dispatcher.spawn(text.as_str().to_owned()),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => dispatcher.spawn(text),
                Err(_) => debug!(len = bytes.len(), "ignoring non-UTF-8 binary frame"),
            },
            Message::Pong(_) => deadline = Instant::now() + config.pong_wait,
            Message::Ping(_) => {}
            Message::Close(frame) => {
                debug!(
                    code = frame.as_ref().map(|f| f.code),
                    reason = frame.as_ref().map(|f| f.reason.as_str()),
                    "client sent close"
                );
                break;
            }
        }
    }

    conn.shutdown();
    debug!("reader stopped");
}
