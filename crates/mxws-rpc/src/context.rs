//! Shared state handed to every command handler.

use std::sync::Arc;

use mxws_upstream::MatrixClient;

/// Per-connection handler context.
#[derive(Clone, Debug)]
pub struct RpcContext {
    /// The session's homeserver client.
    pub client: Arc<MatrixClient>,
}

impl RpcContext {
    /// Create a context around a session client.
    pub fn new(client: Arc<MatrixClient>) -> Self {
        Self { client }
    }
}
