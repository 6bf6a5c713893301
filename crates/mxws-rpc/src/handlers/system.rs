//! Connection-level commands.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;

/// Liveness check. Always succeeds with an empty object.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn handle(
        &self,
        _id: Option<&str>,
        _params: &Value,
        _ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        Ok(json!({}))
    }
}
