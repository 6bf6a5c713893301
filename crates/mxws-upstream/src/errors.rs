//! Upstream failure taxonomy.
//!
//! [`UpstreamError`] is exactly the three ways a homeserver call can fail:
//! no response at all, a non-2xx response with an opaque body, or a non-2xx
//! response carrying a Matrix `{errcode, error}` body. [`ClientError`] adds
//! the failures that happen after a 2xx response was received.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest close reason (in bytes, before the ellipsis) sent to a client.
pub const MAX_CLOSE_REASON: usize = 100;

/// Errcode the homeserver uses for rate limiting.
pub const M_LIMIT_EXCEEDED: &str = "M_LIMIT_EXCEEDED";

/// A non-2xx response, as received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpError {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Type` header value, empty when absent.
    pub content_type: String,
    /// Raw response body.
    pub body: String,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.trim().is_empty() {
            write!(f, "HTTP {}", self.status)
        } else {
            f.write_str(&self.body)
        }
    }
}

impl StdError for HttpError {}

/// The Matrix structured error body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixErrorBody {
    /// Symbolic error code, e.g. `M_FORBIDDEN`.
    pub errcode: String,
    /// Human-readable description.
    pub error: String,
}

/// A non-2xx response whose body decoded as [`MatrixErrorBody`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{} ({})", details.errcode, details.error)]
pub struct MatrixError {
    /// The response as received.
    pub http: HttpError,
    /// The decoded error body.
    pub details: MatrixErrorBody,
}

/// Failure of a single homeserver call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The homeserver could not be reached, or the response could not be read.
    #[error("{0}")]
    Connect(#[source] reqwest::Error),
    /// Non-2xx response with a body that is not a Matrix error.
    #[error(transparent)]
    Http(HttpError),
    /// Non-2xx response with a Matrix error body.
    #[error(transparent)]
    Matrix(MatrixError),
}

impl UpstreamError {
    /// Build a connectivity error, stripping the URL (which carries the
    /// access token) from the underlying error.
    pub fn connect(err: reqwest::Error) -> Self {
        Self::Connect(err.without_url())
    }

    /// Classify a non-2xx response.
    ///
    /// It is a [`UpstreamError::Matrix`] only when the content type is
    /// `application/json` and the body decodes as `{errcode, error}`.
    pub fn from_response(status: u16, content_type: String, body: String) -> Self {
        let http = HttpError {
            status,
            content_type,
            body,
        };
        if is_json(&http.content_type) {
            if let Ok(details) = serde_json::from_str::<MatrixErrorBody>(&http.body) {
                return Self::Matrix(MatrixError { http, details });
            }
        }
        Self::Http(http)
    }

    /// The received response, if there was one.
    pub fn http(&self) -> Option<&HttpError> {
        match self {
            Self::Connect(_) => None,
            Self::Http(http) => Some(http),
            Self::Matrix(err) => Some(&err.http),
        }
    }

    /// HTTP status of the received response, if there was one.
    pub fn status(&self) -> Option<u16> {
        self.http().map(|http| http.status)
    }

    /// Whether the homeserver rejected the call for rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Connect(_) => false,
            Self::Http(http) => http.status == 429,
            Self::Matrix(err) => err.http.status == 429 || err.details.errcode == M_LIMIT_EXCEEDED,
        }
    }
}

/// `Content-Type` essence check, ignoring parameters such as `charset`.
fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}

/// Errors surfaced by [`MatrixClient`](crate::MatrixClient) and the sync loop.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The homeserver call itself failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// A 2xx response whose body broke the API contract.
    #[error("invalid homeserver response: {0}")]
    InvalidResponse(String),
    /// The configured homeserver URL cannot be used as a base.
    #[error("invalid homeserver URL: {0}")]
    InvalidBaseUrl(String),
    /// The shared HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    /// A command's request body could not be serialized.
    #[error("failed to encode request body: {0}")]
    EncodeRequest(#[source] serde_json::Error),
}

impl ClientError {
    /// The upstream failure, if this is one.
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::Upstream(err) => Some(err),
            _ => None,
        }
    }

    /// The decoded Matrix error body, if the homeserver sent one.
    pub fn matrix_details(&self) -> Option<&MatrixErrorBody> {
        match self {
            Self::Upstream(UpstreamError::Matrix(err)) => Some(&err.details),
            _ => None,
        }
    }

    /// Human-readable reason suitable for a websocket close frame.
    ///
    /// Connectivity errors are unwrapped to their innermost cause. The
    /// result is cut to [`MAX_CLOSE_REASON`] bytes on a character boundary,
    /// with `...` appended when anything was dropped.
    pub fn close_reason(&self) -> String {
        let message = match self {
            Self::Upstream(UpstreamError::Connect(err)) => root_cause(err),
            other => other.to_string(),
        };
        truncate_reason(&message)
    }
}

fn root_cause(err: &(dyn StdError + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

/// Truncate `message` to [`MAX_CLOSE_REASON`] bytes plus an ellipsis.
pub fn truncate_reason(message: &str) -> String {
    if message.len() <= MAX_CLOSE_REASON {
        return message.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}
