//! # mxws-rpc
//!
//! The command protocol spoken over a stream: wire envelopes, error codes,
//! a name-to-handler registry and the five room commands.
//!
//! [`handle_message`] is the whole dispatcher as seen from a connection: raw
//! text in, one serialized response out.

#![deny(unsafe_code)]

pub mod context;
pub mod dispatch;
pub mod errors;
pub mod handlers;
pub mod registry;
pub mod types;

pub use context::RpcContext;
pub use dispatch::{HandleResult, handle_message};
pub use errors::RpcError;
pub use registry::{MethodHandler, MethodRegistry};
pub use types::{CommandRequest, CommandResponse, ErrorBody};
