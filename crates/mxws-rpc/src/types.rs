//! Command wire format.
//!
//! ```text
//! -> {"id": "1", "method": "send", "params": {"room_id": "!r:hs", ...}}
//! <- {"id": "1", "result": {"event_id": "$e"}}
//! <- {"id": "1", "error": {"errcode": "M_FORBIDDEN", "error": "..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Incoming command from a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Correlation identifier, echoed on the response.
    #[serde(default)]
    pub id: Option<String>,
    /// Method name (e.g. `send`).
    pub method: String,
    /// Parameters object. Absent and `null` both mean `{}`.
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outgoing response. Exactly one of `result`/`error` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Echoed identifier; serialized as `null` when unknown.
    pub id: Option<String>,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Error payload, shaped like a Matrix error body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Symbolic code, e.g. `M_BAD_JSON`.
    pub errcode: String,
    /// Human-readable message.
    pub error: String,
}

impl CommandResponse {
    /// Build a success response.
    pub fn success(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: Option<String>, errcode: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorBody {
                errcode: errcode.into(),
                error: error.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_id_or_params() {
        let req: CommandRequest = serde_json::from_str(r#"{"method":"ping"}"#).unwrap();
        assert_eq!(req.method, "ping");
        assert!(req.id.is_none());
        assert!(req.params.is_none());
    }

    #[test]
    fn request_with_null_params() {
        let req: CommandRequest =
            serde_json::from_str(r#"{"id":"1","method":"ping","params":null}"#).unwrap();
        assert_eq!(req.id.as_deref(), Some("1"));
        assert!(req.params.is_none());
    }

    #[test]
    fn request_missing_method_fails() {
        assert!(serde_json::from_str::<CommandRequest>(r#"{"id":"1"}"#).is_err());
    }

    #[test]
    fn success_omits_error() {
        let resp = CommandResponse::success(Some("1234".into()), json!({}));
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"id": "1234", "result": {}})
        );
    }

    #[test]
    fn error_keeps_null_id() {
        let resp = CommandResponse::error(None, "M_NOT_JSON", "bad");
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"id": null, "error": {"errcode": "M_NOT_JSON", "error": "bad"}})
        );
    }
}
