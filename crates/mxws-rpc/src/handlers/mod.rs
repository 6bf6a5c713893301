//! Command handlers and registration.

pub mod room;
pub mod system;

use serde_json::{Map, Value};

use crate::errors::RpcError;
use crate::registry::MethodRegistry;

/// Register all command handlers with the registry.
pub fn register_all(registry: &mut MethodRegistry) {
    registry.register("ping", system::PingHandler);

    registry.register("send", room::SendHandler);
    registry.register("state", room::StateHandler);
    registry.register("typing", room::TypingHandler);
    registry.register("read_markers", room::ReadMarkersHandler);
}

/// Extract a required parameter.
pub(crate) fn require_param<'a>(params: &'a Value, key: &str) -> Result<&'a Value, RpcError> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| RpcError::bad_json(format!("Missing required parameter: {key}")))
}

/// Extract a required, non-empty string parameter.
pub(crate) fn require_string_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    let value = require_param(params, key)?
        .as_str()
        .ok_or_else(|| RpcError::bad_json(format!("Parameter '{key}' must be a string")))?;
    if value.is_empty() {
        return Err(RpcError::bad_json(format!("Missing required parameter: {key}")));
    }
    Ok(value)
}

/// Extract a required object parameter.
pub(crate) fn require_object_param<'a>(
    params: &'a Value,
    key: &str,
) -> Result<&'a Map<String, Value>, RpcError> {
    require_param(params, key)?
        .as_object()
        .ok_or_else(|| RpcError::bad_json(format!("Parameter '{key}' must be an object")))
}

/// Extract an optional string parameter.
pub(crate) fn opt_string_param<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>, RpcError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| RpcError::bad_json(format!("Parameter '{key}' must be a string"))),
    }
}

/// Extract an optional boolean parameter.
pub(crate) fn opt_bool_param(params: &Value, key: &str) -> Result<Option<bool>, RpcError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| RpcError::bad_json(format!("Parameter '{key}' must be a boolean"))),
    }
}

/// Extract an optional non-negative integer parameter.
pub(crate) fn opt_u64_param(params: &Value, key: &str) -> Result<Option<u64>, RpcError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            RpcError::bad_json(format!("Parameter '{key}' must be a non-negative integer"))
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_all_populates_registry() {
        let mut reg = MethodRegistry::new();
        register_all(&mut reg);
        for method in ["ping", "send", "state", "typing", "read_markers"] {
            assert!(reg.has_method(method), "{method}");
        }
    }

    #[test]
    fn require_param_present() {
        let params = json!({"room_id": "!r:hs"});
        assert_eq!(require_param(&params, "room_id").unwrap(), "!r:hs");
    }

    #[test]
    fn require_param_missing_or_null() {
        let params = json!({"other": 1, "room_id": null});
        let err = require_param(&params, "room_id").unwrap_err();
        assert_eq!(err.code(), "M_BAD_JSON");
        assert!(err.to_string().contains("room_id"));
    }

    #[test]
    fn require_string_rejects_empty_and_wrong_type() {
        assert!(require_string_param(&json!({"k": ""}), "k").is_err());
        assert!(require_string_param(&json!({"k": 5}), "k").is_err());
        assert_eq!(require_string_param(&json!({"k": "v"}), "k").unwrap(), "v");
    }

    #[test]
    fn require_object_rejects_scalars() {
        assert!(require_object_param(&json!({"content": "x"}), "content").is_err());
        assert!(require_object_param(&json!({"content": {}}), "content").is_ok());
    }

    #[test]
    fn optional_params() {
        let params = json!({"s": "v", "b": true, "n": 30, "bad": "x"});
        assert_eq!(opt_string_param(&params, "s").unwrap(), Some("v"));
        assert_eq!(opt_string_param(&params, "missing").unwrap(), None);
        assert_eq!(opt_bool_param(&params, "b").unwrap(), Some(true));
        assert!(opt_bool_param(&params, "bad").is_err());
        assert_eq!(opt_u64_param(&params, "n").unwrap(), Some(30));
        assert!(opt_u64_param(&json!({"n": -1}), "n").is_err());
    }
}
