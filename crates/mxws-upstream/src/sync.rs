//! The `/sync` cursor state machine.
//!
//! A [`Syncer`] starts in immediate mode (server-side wait of zero) so the
//! snapshot taken during connection setup returns at once. After the first
//! successful poll it switches to long-poll mode for every later call.
//! `next_batch` from each successful response becomes the next `since`;
//! a failed poll leaves the cursor untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::client::MatrixClient;
use crate::errors::ClientError;

/// Parameters of the next `/sync` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncCursor {
    /// `since` token; `None` until the first successful poll unless the
    /// client supplied one.
    pub since: Option<String>,
    /// Server-side wait.
    pub timeout: Duration,
    /// Optional filter ID or inline filter JSON.
    pub filter: Option<String>,
}

/// A source of sync bodies, one per call.
///
/// The connection lifecycle only depends on this capability, so tests can
/// drive it without a homeserver.
#[async_trait]
pub trait SyncSource: Send {
    /// Perform one poll and return the raw body.
    async fn poll(&mut self) -> Result<String, ClientError>;
}

/// [`SyncSource`] backed by a [`MatrixClient`].
#[derive(Debug)]
pub struct Syncer {
    client: Arc<MatrixClient>,
    cursor: SyncCursor,
    long_poll_timeout: Duration,
}

impl Syncer {
    /// Create a syncer in immediate mode.
    pub fn new(
        client: Arc<MatrixClient>,
        since: Option<String>,
        filter: Option<String>,
        long_poll_timeout: Duration,
    ) -> Self {
        Self {
            client,
            cursor: SyncCursor {
                since: since.filter(|s| !s.is_empty()),
                timeout: Duration::ZERO,
                filter: filter.filter(|f| !f.is_empty()),
            },
            long_poll_timeout,
        }
    }

    /// The parameters the next poll will use.
    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }
}

#[async_trait]
impl SyncSource for Syncer {
    async fn poll(&mut self) -> Result<String, ClientError> {
        let body = self.client.sync(&self.cursor).await?;
        let next_batch = extract_next_batch(&body)?;
        debug!(
            since = self.cursor.since.as_deref().unwrap_or(""),
            next_batch = %next_batch,
            "sync advanced"
        );
        self.cursor.since = Some(next_batch);
        self.cursor.timeout = self.long_poll_timeout;
        Ok(body)
    }
}

/// Pull the required `next_batch` token out of a sync body.
///
/// A missing, empty or non-string token is an upstream contract violation.
pub fn extract_next_batch(body: &str) -> Result<String, ClientError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ClientError::InvalidResponse(format!("sync body is not JSON: {e}")))?;
    match value.get("next_batch").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(ClientError::InvalidResponse(
            "sync response has no next_batch".into(),
        )),
    }
}
