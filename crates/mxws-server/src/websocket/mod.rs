//! Per-stream machinery.
//!
//! A stream runs three cooperating flows that share one shutdown signal:
//!
//! - **writer**: the only code that writes to the transport; drains the
//!   outbound queue in order and sends heartbeat pings
//! - **reader**: reads frames, enforces the read deadline and spawns one
//!   task per command
//! - **sync pump**: long-polls `/sync` and enqueues each body
//!
//! Whichever flow ends first fires the signal and the others follow.

pub mod connection;
pub mod outbound;
mod pump;
mod reader;
pub mod session;
mod writer;

pub use connection::{ActiveStreams, Connection, ConnectionState, StreamGuard};
pub use outbound::{CLOSE_INTERNAL_ERROR, Outbound, OutboundMessage};
pub use session::StreamSession;
