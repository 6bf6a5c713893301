//! Method registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::types::{CommandRequest, CommandResponse};

/// Trait implemented by every command handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler.
    ///
    /// `params` is always an object; `id` is the request's correlation ID.
    async fn handle(
        &self,
        id: Option<&str>,
        params: &Value,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in command.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::handlers::register_all(&mut registry);
        registry
    }

    /// Register a handler for a method name.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Dispatch a decoded request to its handler.
    pub async fn dispatch(&self, request: CommandRequest, ctx: &RpcContext) -> CommandResponse {
        let CommandRequest { id, method, params } = request;

        let Some(handler) = self.handlers.get(&method) else {
            counter!("mxws_commands_total", "method" => "unrecognized").increment(1);
            warn!(method, "unknown command method");
            return error_response(id, &RpcError::UnknownMethod { method });
        };
        counter!("mxws_commands_total", "method" => method.clone()).increment(1);

        let params = match params {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(value @ Value::Object(_)) => value,
            Some(_) => {
                let err = RpcError::bad_json("params must be an object");
                record_error(&method, &err);
                return error_response(id, &err);
            }
        };

        let start = Instant::now();
        let result = handler.handle(id.as_deref(), &params, ctx).await;
        histogram!("mxws_command_duration_seconds", "method" => method.clone())
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(result) => {
                debug!(method, "command succeeded");
                CommandResponse::success(id, result)
            }
            Err(err) => {
                record_error(&method, &err);
                error_response(id, &err)
            }
        }
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn record_error(method: &str, err: &RpcError) {
    counter!(
        "mxws_command_errors_total",
        "method" => method.to_owned(),
        "errcode" => err.code().to_owned()
    )
    .increment(1);
    debug!(method, errcode = err.code(), error = %err, "command failed");
}

pub(crate) fn error_response(id: Option<String>, err: &RpcError) -> CommandResponse {
    let body = err.to_error_body();
    CommandResponse {
        id,
        result: None,
        error: Some(body),
    }
}
