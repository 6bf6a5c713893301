//! The writer flow: sole owner of transport writes, and the heartbeat.

use std::fmt;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::outbound::OutboundMessage;
use crate::config::StreamConfig;
use crate::metrics::FRAMES_SENT_TOTAL;

enum Step {
    Write(Message, &'static str),
    Close(Message),
    Stop,
}

/// Drain `queue` to `sink` in order, pinging every `ping_interval`.
///
/// Exits on a write failure, after writing a close directive, when the queue
/// closes, or on shutdown. Always fires shutdown and closes the sink before
/// returning.
pub(crate) async fn run_writer<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<OutboundMessage>,
    conn: &Connection,
    config: &StreamConfig,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let token = conn.shutdown_token().clone();
    let mut ticker =
        tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("writer started");
    loop {
        let step = tokio::select! {
            biased;
            () = token.cancelled() => {
                flush_pending_close(&mut sink, &mut queue, config.write_wait).await;
                Step::Stop
            }
            item = queue.recv() => match item {
                Some(OutboundMessage::Data(text)) => Step::Write(Message::Text(text.into()), "data"),
                Some(OutboundMessage::Close { code, reason }) => Step::Close(close_frame(code, reason)),
                None => Step::Stop,
            },
            _ = ticker.tick() => Step::Write(Message::Ping(Bytes::new()), "ping"),
        };

        match step {
            Step::Write(frame, kind) => {
                if let Err(e) = write_frame(&mut sink, frame, config.write_wait).await {
                    warn!(kind, error = %e, "write failed");
                    break;
                }
                counter!(FRAMES_SENT_TOTAL, "kind" => kind).increment(1);
            }
            Step::Close(frame) => {
                if let Err(e) = write_frame(&mut sink, frame, config.write_wait).await {
                    warn!(error = %e, "close frame write failed");
                } else {
                    counter!(FRAMES_SENT_TOTAL, "kind" => "close").increment(1);
                    info!("close frame sent");
                }
                break;
            }
            Step::Stop => break,
        }
    }

    conn.shutdown();
    let _ = tokio::time::timeout(config.write_wait, sink.close()).await;
    debug!("writer stopped");
}

/// On shutdown, anything already queued ahead of a close directive is still
/// written, followed by the close frame. Without a queued close directive
/// the remaining items are dropped.
async fn flush_pending_close<S>(
    sink: &mut S,
    queue: &mut mpsc::Receiver<OutboundMessage>,
    write_wait: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut pending = Vec::new();
    while let Ok(item) = queue.try_recv() {
        let is_close = matches!(item, OutboundMessage::Close { .. });
        pending.push(item);
        if is_close {
            break;
        }
    }
    if !matches!(pending.last(), Some(OutboundMessage::Close { .. })) {
        if !pending.is_empty() {
            debug!(dropped = pending.len(), "dropping queued frames on shutdown");
        }
        return;
    }

    for item in pending {
        let frame = match item {
            OutboundMessage::Data(text) => Message::Text(text.into()),
            OutboundMessage::Close { code, reason } => close_frame(code, reason),
        };
        if let Err(e) = write_frame(sink, frame, write_wait).await {
            warn!(error = %e, "write failed while flushing close");
            return;
        }
    }
    counter!(FRAMES_SENT_TOTAL, "kind" => "close").increment(1);
    info!("close frame sent");
}

fn close_frame(code: u16, reason: String) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

async fn write_frame<S>(sink: &mut S, frame: Message, write_wait: Duration) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write deadline of {write_wait:?} exceeded")),
    }
}
