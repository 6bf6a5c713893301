//! Homeserver HTTP client.

use std::fmt;
use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::errors::{ClientError, UpstreamError};
use crate::redact::redact;
use crate::sync::SyncCursor;

const CLIENT_API: [&str; 3] = ["_matrix", "client", "r0"];

/// Process-wide connection to one homeserver.
///
/// Cheap to clone: the inner `reqwest::Client` is reference counted.
#[derive(Clone, Debug)]
pub struct Homeserver {
    http: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl Homeserver {
    /// Create a client for the homeserver at `base_url`.
    ///
    /// `request_timeout` bounds every non-sync call and is added on top of
    /// the server-side wait for `/sync`.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .user_agent(mxws_core::constants::USER_AGENT)
            .build()
            .map_err(ClientError::HttpClient)?;
        Ok(Self {
            http,
            base_url,
            request_timeout,
        })
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Bind a session credential.
    pub fn client(&self, access_token: impl Into<String>) -> MatrixClient {
        MatrixClient {
            homeserver: self.clone(),
            access_token: access_token.into(),
            identity: OnceCell::new(),
        }
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            let _ = path.pop_if_empty().extend(CLIENT_API).extend(segments);
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                let _ = pairs.append_pair(key, value);
            }
        }
        url
    }
}

#[derive(Deserialize)]
struct WhoAmI {
    user_id: String,
}

#[derive(Deserialize)]
struct EventIdResponse {
    event_id: String,
}

/// One session's view of the homeserver.
///
/// Owns the access token and lazily resolves (then caches) the user ID the
/// token belongs to.
pub struct MatrixClient {
    homeserver: Homeserver,
    access_token: String,
    identity: OnceCell<String>,
}

impl fmt::Debug for MatrixClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixClient")
            .field("base_url", &self.homeserver.base_url.as_str())
            .field("access_token", &crate::redact::REDACTED)
            .field("identity", &self.identity.get())
            .finish()
    }
}

impl MatrixClient {
    /// The user ID behind the access token, resolved once via `whoami`.
    pub async fn whoami(&self) -> Result<&str, ClientError> {
        let user_id = self
            .identity
            .get_or_try_init(|| async {
                let body = self
                    .request(Method::GET, "whoami", &["account", "whoami"], &[], None, None)
                    .await?;
                let whoami: WhoAmI = serde_json::from_str(&body)
                    .map_err(|e| ClientError::InvalidResponse(format!("whoami: {e}")))?;
                debug!(user_id = %whoami.user_id, "resolved identity");
                Ok::<_, ClientError>(whoami.user_id)
            })
            .await?;
        Ok(user_id.as_str())
    }

    /// One `/sync` call. Returns the raw response body.
    pub async fn sync(&self, cursor: &SyncCursor) -> Result<String, ClientError> {
        let timeout_ms = u64::try_from(cursor.timeout.as_millis()).unwrap_or(u64::MAX).to_string();
        let mut query = vec![("timeout", timeout_ms.as_str())];
        if let Some(since) = cursor.since.as_deref() {
            query.push(("since", since));
        }
        if let Some(filter) = cursor.filter.as_deref() {
            query.push(("filter", filter));
        }
        let deadline = cursor.timeout + self.homeserver.request_timeout;
        self.request(Method::GET, "sync", &["sync"], &query, None, Some(deadline))
            .await
    }

    /// Send a message event. Returns the new event ID.
    pub async fn send_message(
        &self,
        room_id: &str,
        event_type: &str,
        txn_id: &str,
        content: &Value,
    ) -> Result<String, ClientError> {
        let body = self
            .request(
                Method::PUT,
                "send",
                &["rooms", room_id, "send", event_type, txn_id],
                &[],
                Some(content),
                None,
            )
            .await?;
        event_id(&body)
    }

    /// Send a state event. An empty `state_key` addresses the default key.
    pub async fn send_state(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: &Value,
    ) -> Result<String, ClientError> {
        let body = self
            .request(
                Method::PUT,
                "state",
                &["rooms", room_id, "state", event_type, state_key],
                &[],
                Some(content),
                None,
            )
            .await?;
        event_id(&body)
    }

    /// Set the typing indicator for this session's user.
    ///
    /// `timeout_ms` is only sent when `typing` is set and it is non-zero. A rate-limited
    /// response is reported as success with an empty object.
    pub async fn send_typing(
        &self,
        room_id: &str,
        typing: bool,
        timeout_ms: Option<u64>,
    ) -> Result<Value, ClientError> {
        let user_id = self.whoami().await?.to_string();

        let mut body = Map::new();
        let _ = body.insert("typing".into(), Value::Bool(typing));
        if let Some(timeout) = timeout_ms.filter(|ms| typing && *ms > 0) {
            let _ = body.insert("timeout".into(), Value::from(timeout));
        }
        let body = Value::Object(body);

        let result = self
            .request(
                Method::PUT,
                "typing",
                &["rooms", room_id, "typing", &user_id],
                &[],
                Some(&body),
                None,
            )
            .await;
        match result {
            Ok(raw) => json_body(&raw),
            Err(ClientError::Upstream(err)) if err.is_rate_limited() => {
                debug!(room_id, error = %err, "typing notification rate limited, ignoring");
                Ok(Value::Object(Map::new()))
            }
            Err(err) => Err(err),
        }
    }

    /// Update the fully-read and/or read-receipt markers of a room.
    pub async fn send_read_markers(&self, room_id: &str, markers: &Value) -> Result<Value, ClientError> {
        let raw = self
            .request(
                Method::POST,
                "read_markers",
                &["rooms", room_id, "read_markers"],
                &[],
                Some(markers),
                None,
            )
            .await?;
        json_body(&raw)
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &'static str,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<String, ClientError> {
        let mut params = Vec::with_capacity(query.len() + 1);
        params.push(("access_token", self.access_token.as_str()));
        params.extend_from_slice(query);
        let url = self.homeserver.url(segments, &params);
        let log_url = redact(url.as_str()).into_owned();

        let payload = match body {
            Some(value) => serde_json::to_vec(value).map_err(ClientError::EncodeRequest)?,
            None => Vec::new(),
        };

        debug!(%method, endpoint, url = %log_url, "upstream request");
        let started = Instant::now();

        let response = self
            .homeserver
            .http
            .request(method.clone(), url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout.unwrap_or(self.homeserver.request_timeout))
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                let err = UpstreamError::connect(e);
                warn!(%method, endpoint, url = %log_url, error = %err, "upstream unreachable");
                err
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response.text().await.map_err(UpstreamError::connect)?;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if status.is_success() {
            debug!(endpoint, status = status.as_u16(), elapsed_ms, "upstream response");
            return Ok(text);
        }

        let err = UpstreamError::from_response(status.as_u16(), content_type, text);
        debug!(endpoint, status = status.as_u16(), elapsed_ms, error = %err, "upstream error response");
        Err(err.into())
    }
}

fn event_id(body: &str) -> Result<String, ClientError> {
    serde_json::from_str::<EventIdResponse>(body)
        .map(|r| r.event_id)
        .map_err(|e| ClientError::InvalidResponse(format!("event_id: {e}")))
}

fn json_body(raw: &str) -> Result<Value, ClientError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}
