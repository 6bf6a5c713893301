//! `MxwsServer`: the axum router, the `/stream` endpoint and the listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::StreamExt;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use mxws_rpc::{MethodRegistry, RpcContext};
use mxws_upstream::{ClientError, Homeserver, SyncSource, Syncer};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::config::{ServerConfig, StreamConfig};
use crate::health::{self, HealthResponse};
use crate::metrics::{self as server_metrics, STREAM_SETUP_FAILURES_TOTAL};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{ActiveStreams, Connection, ConnectionState, StreamSession};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Homeserver every session talks to.
    pub homeserver: Homeserver,
    /// Command handlers.
    pub registry: Arc<MethodRegistry>,
    /// Process-wide shutdown.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Open-stream counter.
    pub active: ActiveStreams,
    /// Per-stream settings.
    pub stream: Arc<StreamConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// Query parameters of `GET /stream`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Session credential, passed through to the homeserver as-is.
    #[serde(default)]
    pub access_token: String,
    /// Resume point from an earlier stream.
    pub since: Option<String>,
    /// Filter ID or inline filter JSON.
    pub filter: Option<String>,
}

/// The proxy server.
pub struct MxwsServer {
    config: ServerConfig,
    state: AppState,
}

impl MxwsServer {
    /// Create a server.
    pub fn new(
        config: ServerConfig,
        homeserver: Homeserver,
        registry: MethodRegistry,
        metrics: PrometheusHandle,
    ) -> Self {
        let state = AppState {
            homeserver,
            registry: Arc::new(registry),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            active: ActiveStreams::new(),
            stream: Arc::new(config.stream.clone()),
            start_time: Instant::now(),
            metrics,
        };
        Self { config, state }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/stream", get(stream_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in the background until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        info!(%addr, upstream = %self.state.homeserver.base_url(), "mxws listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.state.registry
    }

    /// Streams currently open.
    pub fn active_streams(&self) -> usize {
        self.state.active.count()
    }
}

/// GET /stream
///
/// Performs the initial immediate sync before upgrading. A failed sync is
/// answered over plain HTTP and no upgrade happens.
async fn stream_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(%rejection, "not a websocket request");
            return rejection.into_response();
        }
    };

    let conn = Arc::new(Connection::new(state.shutdown.child_token()));
    let span = info_span!("stream", conn_id = %conn.id);
    let client = Arc::new(state.homeserver.client(params.access_token));
    let mut syncer = Syncer::new(
        client.clone(),
        params.since,
        params.filter,
        state.stream.sync_timeout,
    );

    let initial = match syncer.poll().instrument(span.clone()).await {
        Ok(body) => body,
        Err(e) => {
            counter!(STREAM_SETUP_FAILURES_TOTAL).increment(1);
            conn.advance(ConnectionState::Closed);
            span.in_scope(|| warn!(error = %e, "initial sync failed"));
            return setup_failure_response(&e);
        }
    };

    let config = (*state.stream).clone();
    ws.protocols([config.subprotocol.clone()])
        .max_message_size(config.max_message_bytes)
        .max_frame_size(config.max_message_bytes)
        .on_upgrade(move |socket: WebSocket| async move {
            let _guard = state.active.open();
            let (sink, stream) = socket.split();
            let session = StreamSession {
                conn,
                config,
                registry: state.registry.clone(),
                ctx: RpcContext::new(client),
                tracker: state.shutdown.tracker(),
            };
            session.run(sink, stream, syncer, initial).await;
        })
}

/// Relay the homeserver's answer when there was one; otherwise 500.
fn setup_failure_response(err: &ClientError) -> Response {
    let Some(http) = err.upstream().and_then(|u| u.http()) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    };

    let status = StatusCode::from_u16(http.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, http.body.clone()).into_response();
    let headers = response.headers_mut();
    match HeaderValue::from_str(&http.content_type) {
        Ok(content_type) if !http.content_type.is_empty() => {
            let _ = headers.insert(header::CONTENT_TYPE, content_type);
        }
        _ => {
            let _ = headers.remove(header::CONTENT_TYPE);
        }
    }
    response
}

/// The request line without its query string, which carries the credential.
fn request_span(request: &Request<Body>) -> Span {
    info_span!("request", method = %request.method(), path = request.uri().path())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.active.count()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    server_metrics::render(&state.metrics)
}
