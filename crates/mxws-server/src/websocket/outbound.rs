//! The outbound queue: many producers, one writer.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Close code sent when the sync loop fails (internal error).
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// An item for the writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    /// A text frame for the client.
    Data(String),
    /// Send a close frame, then stop writing.
    Close {
        /// Close code.
        code: u16,
        /// Short human-readable reason.
        reason: String,
    },
}

/// Producer handle for a stream's outbound queue.
///
/// Sends wait for capacity rather than drop, but give up as soon as the
/// stream is shutting down.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<OutboundMessage>,
    shutdown: CancellationToken,
}

impl Outbound {
    /// Create a bounded queue tied to `shutdown`.
    pub fn channel(
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, shutdown }, rx)
    }

    /// Enqueue a message. Returns `false` if the stream is shutting down or
    /// the writer is gone.
    pub async fn send(&self, message: OutboundMessage) -> bool {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            sent = self.tx.send(message) => sent.is_ok(),
        }
    }

    /// Enqueue a text frame.
    pub async fn send_data(&self, text: String) -> bool {
        self.send(OutboundMessage::Data(text)).await
    }
}
