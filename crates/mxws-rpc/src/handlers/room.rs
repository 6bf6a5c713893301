//! Room commands: forwarded to the homeserver's per-room endpoints.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::handlers::{
    opt_bool_param, opt_string_param, opt_u64_param, require_object_param, require_string_param,
};
use crate::registry::MethodHandler;

/// Canonical key for the fully-read marker.
pub const FULLY_READ: &str = "m.fully_read";
/// Canonical key for the read receipt.
pub const READ: &str = "m.read";

/// Send a message event. The request ID doubles as the transaction ID.
pub struct SendHandler;

#[async_trait]
impl MethodHandler for SendHandler {
    async fn handle(
        &self,
        id: Option<&str>,
        params: &Value,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let room_id = require_string_param(params, "room_id")?;
        let event_type = require_string_param(params, "event_type")?;
        let content = require_object_param(params, "content")?;
        let txn_id = id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RpcError::bad_json("Missing request ID"))?;

        let event_id = ctx
            .client
            .send_message(room_id, event_type, txn_id, &Value::Object(content.clone()))
            .await?;
        Ok(json!({ "event_id": event_id }))
    }
}

/// Send a state event. `state_key` defaults to the empty key.
pub struct StateHandler;

#[async_trait]
impl MethodHandler for StateHandler {
    async fn handle(
        &self,
        _id: Option<&str>,
        params: &Value,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let room_id = require_string_param(params, "room_id")?;
        let event_type = require_string_param(params, "event_type")?;
        let content = require_object_param(params, "content")?;
        let state_key = opt_string_param(params, "state_key")?.unwrap_or_default();

        let event_id = ctx
            .client
            .send_state(room_id, event_type, state_key, &Value::Object(content.clone()))
            .await?;
        Ok(json!({ "event_id": event_id }))
    }
}

/// Start or stop the typing indicator.
pub struct TypingHandler;

#[async_trait]
impl MethodHandler for TypingHandler {
    async fn handle(
        &self,
        _id: Option<&str>,
        params: &Value,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let room_id = require_string_param(params, "room_id")?;
        let typing = opt_bool_param(params, "typing")?.unwrap_or(false);
        let timeout = opt_u64_param(params, "timeout")?;

        Ok(ctx.client.send_typing(room_id, typing, timeout).await?)
    }
}

/// Move the fully-read marker and/or the read receipt.
///
/// Accepts `m.fully_read`/`m.read`, or the bare `fully_read`/`read`.
pub struct ReadMarkersHandler;

#[async_trait]
impl MethodHandler for ReadMarkersHandler {
    async fn handle(
        &self,
        _id: Option<&str>,
        params: &Value,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let room_id = require_string_param(params, "room_id")?;
        let fully_read = marker(params, FULLY_READ, "fully_read")?;
        let read = marker(params, READ, "read")?;

        let mut body = Map::new();
        if let Some(event_id) = fully_read {
            let _ = body.insert(FULLY_READ.into(), Value::from(event_id));
        }
        if let Some(event_id) = read {
            let _ = body.insert(READ.into(), Value::from(event_id));
        }
        if body.is_empty() {
            return Err(RpcError::bad_json(format!(
                "Missing required parameter: {FULLY_READ} or {READ}"
            )));
        }

        Ok(ctx.client.send_read_markers(room_id, &Value::Object(body)).await?)
    }
}

fn marker<'a>(params: &'a Value, key: &str, alias: &str) -> Result<Option<&'a str>, RpcError> {
    let value = match opt_string_param(params, key)? {
        Some(v) => Some(v),
        None => opt_string_param(params, alias)?,
    };
    Ok(value.filter(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::handlers::test_helpers::{TOKEN, make_test_context};

    async fn mount_whoami(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/_matrix/client/r0/account/whoami"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": "@me:hs"})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn send_returns_event_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/_matrix/client/r0/rooms/ROOM_ID/send/EVENT_TYPE/1234"))
            .and(query_param("access_token", TOKEN))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "EVENT_ID"})))
            .expect(1)
            .mount(&server)
            .await;
        let ctx = make_test_context(&server.uri());

        let result = SendHandler
            .handle(
                Some("1234"),
                &json!({"room_id": "ROOM_ID", "event_type": "EVENT_TYPE", "content": {}}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"event_id": "EVENT_ID"}));
    }

    #[tokio::test]
    async fn send_requires_id_and_fields() {
        let ctx = make_test_context("http://127.0.0.1:9");
        let full = json!({"room_id": "R", "event_type": "T", "content": {}});

        let err = SendHandler.handle(None, &full, &ctx).await.unwrap_err();
        assert_matches!(err, RpcError::BadJson { ref message } if message.contains("request ID"));

        for missing in ["room_id", "event_type", "content"] {
            let mut params = full.clone();
            let _ = params.as_object_mut().unwrap().remove(missing);
            let err = SendHandler.handle(Some("1"), &params, &ctx).await.unwrap_err();
            assert_eq!(err.code(), "M_BAD_JSON", "{missing}");
            assert!(err.to_string().contains(missing));
        }
    }

    #[tokio::test]
    async fn send_rejects_non_object_content() {
        let ctx = make_test_context("http://127.0.0.1:9");
        let err = SendHandler
            .handle(
                Some("1"),
                &json!({"room_id": "R", "event_type": "T", "content": "hello"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "M_BAD_JSON");
    }

    #[tokio::test]
    async fn state_defaults_to_empty_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/_matrix/client/r0/rooms/R/state/m.room.name/"))
            .and(body_json(json!({"name": "n"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "$s"})))
            .expect(1)
            .mount(&server)
            .await;
        let ctx = make_test_context(&server.uri());

        let result = StateHandler
            .handle(
                None,
                &json!({"room_id": "R", "event_type": "m.room.name", "content": {"name": "n"}}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"event_id": "$s"}));
    }

    #[tokio::test]
    async fn state_with_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/_matrix/client/r0/rooms/R/state/m.room.member/@me:hs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "$m"})))
            .expect(1)
            .mount(&server)
            .await;
        let ctx = make_test_context(&server.uri());

        let _ = StateHandler
            .handle(
                None,
                &json!({
                    "room_id": "R",
                    "event_type": "m.room.member",
                    "state_key": "@me:hs",
                    "content": {"membership": "join"}
                }),
                &ctx,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn typing_forwards_timeout_only_when_typing() {
        let server = MockServer::start().await;
        mount_whoami(&server).await;
        Mock::given(method("PUT"))
            .and(path("/_matrix/client/r0/rooms/R/typing/@me:hs"))
            .and(body_json(json!({"typing": true, "timeout": 30000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/_matrix/client/r0/rooms/R/typing/@me:hs"))
            .and(body_json(json!({"typing": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        let ctx = make_test_context(&server.uri());

        let on = TypingHandler
            .handle(None, &json!({"room_id": "R", "typing": true, "timeout": 30000}), &ctx)
            .await
            .unwrap();
        assert_eq!(on, json!({}));
        let _ = TypingHandler
            .handle(None, &json!({"room_id": "R", "typing": false, "timeout": 30000}), &ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn typing_rate_limit_reports_success() {
        let server = MockServer::start().await;
        mount_whoami(&server).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;
        let ctx = make_test_context(&server.uri());

        let result = TypingHandler
            .handle(None, &json!({"room_id": "R", "typing": true}), &ctx)
            .await
            .unwrap();
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn typing_requires_room() {
        let ctx = make_test_context("http://127.0.0.1:9");
        let err = TypingHandler
            .handle(None, &json!({"typing": true}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "M_BAD_JSON");
    }

    #[tokio::test]
    async fn read_markers_accepts_aliases() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_matrix/client/r0/rooms/R/read_markers"))
            .and(body_json(json!({"m.fully_read": "$a", "m.read": "$b"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(2)
            .mount(&server)
            .await;
        let ctx = make_test_context(&server.uri());

        for params in [
            json!({"room_id": "R", "m.fully_read": "$a", "m.read": "$b"}),
            json!({"room_id": "R", "fully_read": "$a", "read": "$b"}),
        ] {
            let result = ReadMarkersHandler.handle(None, &params, &ctx).await.unwrap();
            assert_eq!(result, json!({}));
        }
    }

    #[tokio::test]
    async fn read_markers_requires_a_marker() {
        let ctx = make_test_context("http://127.0.0.1:9");
        let err = ReadMarkersHandler
            .handle(None, &json!({"room_id": "R"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "M_BAD_JSON");
    }

    #[tokio::test]
    async fn upstream_matrix_error_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#"{"errcode":"M_FORBIDDEN","error":"not joined"}"#),
            )
            .mount(&server)
            .await;
        let ctx = make_test_context(&server.uri());

        let err = SendHandler
            .handle(
                Some("1"),
                &json!({"room_id": "R", "event_type": "T", "content": {}}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "M_FORBIDDEN");
        assert_eq!(err.to_error_body().error, "not joined");
    }
}
