//! # mxws-upstream
//!
//! Everything that talks to the Matrix homeserver:
//!
//! - [`Homeserver`]: process-wide HTTP client and base URL
//! - [`MatrixClient`]: one session's credential, cached identity and the
//!   per-room write endpoints
//! - [`Syncer`]: the `/sync` cursor state machine behind the [`SyncSource`]
//!   capability
//! - [`errors`]: the three-way upstream failure taxonomy
//! - [`redact`]: credential scrubbing for anything that gets logged

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod redact;
pub mod sync;

pub use client::{Homeserver, MatrixClient};
pub use errors::{ClientError, HttpError, MatrixError, MatrixErrorBody, UpstreamError};
pub use sync::{SyncCursor, SyncSource, Syncer, extract_next_batch};
