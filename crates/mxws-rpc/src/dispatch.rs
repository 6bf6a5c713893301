//! Raw-frame entry point: decode, dispatch, encode.

use serde_json::Value;
use tracing::{debug, warn};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::{MethodRegistry, error_response};
use crate::types::{CommandRequest, CommandResponse};

/// Result of handling one inbound frame.
#[derive(Debug)]
pub struct HandleResult {
    /// Serialized response, ready to enqueue.
    pub response_json: String,
    /// Method name, when the envelope decoded far enough to have one.
    pub method: Option<String>,
}

/// Handle one inbound text frame.
///
/// Always produces a response. Frames that are not JSON get `M_NOT_JSON`
/// with a `null` id; JSON that is not a valid envelope gets `M_BAD_JSON`
/// with whatever string `id` could be recovered.
pub async fn handle_message(
    message: &str,
    registry: &MethodRegistry,
    ctx: &RpcContext,
) -> HandleResult {
    let value: Value = match serde_json::from_str(message) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "inbound frame is not JSON");
            let err = RpcError::NotJson {
                message: format!("Invalid JSON: {e}"),
            };
            return finish(None, error_response(None, &err));
        }
    };

    let recovered_id = value.get("id").and_then(Value::as_str).map(String::from);
    let request: CommandRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed command envelope");
            let err = RpcError::bad_json(format!("Invalid request: {e}"));
            return finish(None, error_response(recovered_id, &err));
        }
    };

    let method = request.method.clone();
    debug!(method, id = request.id.as_deref(), "dispatching command");

    let response = registry.dispatch(request, ctx).await;
    finish(Some(method), response)
}

fn finish(method: Option<String>, response: CommandResponse) -> HandleResult {
    let response_json = serde_json::to_string(&response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize response");
        String::new()
    });
    HandleResult {
        response_json,
        method,
    }
}
