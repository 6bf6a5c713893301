//! One upgraded stream: wires the writer, reader and sync pump together.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use mxws_rpc::{MethodRegistry, RpcContext};
use mxws_upstream::SyncSource;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, info, instrument};

use super::connection::{Connection, ConnectionState};
use super::outbound::Outbound;
use super::pump::run_sync_pump;
use super::reader::{Dispatcher, run_reader};
use super::writer::run_writer;
use crate::config::StreamConfig;

/// Everything a stream needs once its initial sync has succeeded.
pub struct StreamSession {
    /// The connection being served.
    pub conn: Arc<Connection>,
    /// Per-stream settings.
    pub config: StreamConfig,
    /// Command handlers.
    pub registry: Arc<MethodRegistry>,
    /// Handler context bound to this session's client.
    pub ctx: RpcContext,
    /// Where command tasks are spawned.
    pub tracker: TaskTracker,
}

impl StreamSession {
    /// Serve the stream until any flow ends it.
    ///
    /// `initial` is the body of the setup sync and is always the first frame
    /// written. `source` continues from that sync's cursor.
    #[instrument(skip_all, fields(conn_id = %self.conn.id))]
    pub async fn run<Tx, Rx, E, S>(self, sink: Tx, stream: Rx, source: S, initial: String)
    where
        Tx: Sink<Message> + Unpin + Send,
        Tx::Error: fmt::Display,
        Rx: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: fmt::Display + Send,
        S: SyncSource + 'static,
    {
        let Self {
            conn,
            config,
            registry,
            ctx,
            tracker,
        } = self;

        let (outbound, queue) =
            Outbound::channel(config.send_queue_capacity, conn.shutdown_token().clone());
        let _ = outbound.send_data(initial).await;
        conn.advance(ConnectionState::Streaming);
        info!("stream started");

        // Left off the tracker: a pump parked in a long-poll only sees
        // shutdown once the poll returns.
        let _ = tokio::spawn(
            run_sync_pump(source, outbound.clone(), conn.clone()).instrument(tracing::Span::current()),
        );
        let dispatcher = Dispatcher {
            registry,
            ctx,
            outbound,
            tracker,
        };

        let ((), ()) = tokio::join!(
            run_writer(sink, queue, &conn, &config),
            run_reader(stream, &conn, &config, &dispatcher),
        );

        conn.advance(ConnectionState::Closed);
        info!(
            duration_ms = u64::try_from(conn.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "stream closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::extract::ws::CloseFrame;
    use futures::channel::mpsc;
    use futures::{SinkExt, StreamExt};
    use mxws_upstream::{ClientError, Homeserver};
    use serde_json::{Value, json};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Scripted(VecDeque<Result<String, ClientError>>);

    #[async_trait]
    impl SyncSource for Scripted {
        async fn poll(&mut self) -> Result<String, ClientError> {
            match self.0.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }
    }

    fn idle() -> Scripted {
        Scripted(VecDeque::new())
    }

    struct Harness {
        to_server: mpsc::Sender<Result<Message, io::Error>>,
        from_server: mpsc::UnboundedReceiver<Message>,
        conn: Arc<Connection>,
        tracker: TaskTracker,
        handle: JoinHandle<()>,
    }

    impl Harness {
        fn start(source: Scripted, config: StreamConfig) -> Self {
            let homeserver =
                Homeserver::new("http://127.0.0.1:9/", Duration::from_secs(1)).unwrap();
            let conn = Arc::new(Connection::new(CancellationToken::new()));
            let tracker = TaskTracker::new();
            let session = StreamSession {
                conn: conn.clone(),
                config,
                registry: Arc::new(MethodRegistry::with_defaults()),
                ctx: RpcContext::new(Arc::new(homeserver.client("TOKEN"))),
                tracker: tracker.clone(),
            };
            let (to_server, rx) = mpsc::channel(16);
            let (tx, from_server) = mpsc::unbounded();
            let handle = tokio::spawn(session.run(tx, rx, source, r#"{"next_batch":"s0"}"#.into()));
            Self {
                to_server,
                from_server,
                conn,
                tracker,
                handle,
            }
        }

        async fn send_text(&mut self, text: &str) {
            self.to_server
                .send(Ok(Message::Text(text.into())))
                .await
                .unwrap();
        }

        /// Next non-ping frame.
        async fn next_frame(&mut self) -> Option<Message> {
            loop {
                let frame = tokio::time::timeout(TIMEOUT, self.from_server.next())
                    .await
                    .expect("timed out waiting for frame")?;
                if !matches!(frame, Message::Ping(_)) {
                    return Some(frame);
                }
            }
        }

        async fn next_json(&mut self) -> Value {
            match self.next_frame().await {
                Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("expected text frame, got {other:?}"),
            }
        }

        async fn finished(self) -> Arc<Connection> {
            tokio::time::timeout(TIMEOUT, self.handle)
                .await
                .expect("session did not end")
                .unwrap();
            self.conn
        }
    }

    #[tokio::test]
    async fn initial_body_is_first_frame() {
        let source = Scripted(VecDeque::from([Ok(r#"{"next_batch":"s1"}"#.to_owned())]));
        let mut h = Harness::start(source, StreamConfig::default());

        assert_eq!(h.next_json().await["next_batch"], "s0");
        assert_eq!(h.next_json().await["next_batch"], "s1");
        assert_eq!(h.conn.state(), ConnectionState::Streaming);
    }

    #[tokio::test]
    async fn ping_command_gets_response() {
        let mut h = Harness::start(idle(), StreamConfig::default());
        let _ = h.next_json().await;

        h.send_text(r#"{"id":"1234","method":"ping"}"#).await;
        assert_eq!(h.next_json().await, json!({"id": "1234", "result": {}}));
    }

    #[tokio::test]
    async fn every_frame_gets_a_response() {
        let mut h = Harness::start(idle(), StreamConfig::default());
        let _ = h.next_json().await;

        h.send_text("not json").await;
        let resp = h.next_json().await;
        assert_eq!(resp["id"], Value::Null);
        assert_eq!(resp["error"]["errcode"], "M_NOT_JSON");

        h.send_text(r#"{"id":"7","method":"nope"}"#).await;
        let resp = h.next_json().await;
        assert_eq!(resp["id"], "7");
        assert_eq!(resp["error"]["errcode"], "M_BAD_JSON");
        assert_eq!(resp["error"]["error"], "Unknown method: nope");
    }

    #[tokio::test]
    async fn binary_utf8_frames_are_commands() {
        let mut h = Harness::start(idle(), StreamConfig::default());
        let _ = h.next_json().await;

        h.to_server
            .send(Ok(Message::Binary(br#"{"id":"b","method":"ping"}"#.to_vec().into())))
            .await
            .unwrap();
        assert_eq!(h.next_json().await["id"], "b");
    }

    #[tokio::test]
    async fn pump_and_commands_interleave_without_reordering() {
        let bodies: VecDeque<_> = (1..=40)
            .map(|n| Ok(format!(r#"{{"next_batch":"s{n}"}}"#)))
            .collect();
        let config = StreamConfig {
            send_queue_capacity: 2,
            ..StreamConfig::default()
        };
        let mut h = Harness::start(Scripted(bodies), config);
        assert_eq!(h.next_json().await["next_batch"], "s0");

        for n in 0..20 {
            h.send_text(&format!(r#"{{"id":"c{n}","method":"ping"}}"#)).await;
        }

        let mut batches = Vec::new();
        let mut ids = Vec::new();
        while batches.len() < 40 || ids.len() < 20 {
            let frame = h.next_json().await;
            if let Some(batch) = frame["next_batch"].as_str() {
                batches.push(batch.to_owned());
            } else {
                assert_eq!(frame["result"], json!({}));
                ids.push(frame["id"].as_str().unwrap().to_owned());
            }
        }

        let expected: Vec<_> = (1..=40).map(|n| format!("s{n}")).collect();
        assert_eq!(batches, expected);
        ids.sort_by_key(|id| id[1..].parse::<u32>().unwrap());
        let expected: Vec<_> = (0..20).map(|n| format!("c{n}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn sync_failure_closes_with_internal_error() {
        let reason = "x".repeat(150);
        let source = Scripted(VecDeque::from([
            Ok(r#"{"next_batch":"s1"}"#.to_owned()),
            Err(ClientError::InvalidResponse(reason)),
        ]));
        let mut h = Harness::start(source, StreamConfig::default());

        assert_eq!(h.next_json().await["next_batch"], "s0");
        assert_eq!(h.next_json().await["next_batch"], "s1");
        let Some(Message::Close(Some(CloseFrame { code, reason }))) = h.next_frame().await else {
            panic!("expected close frame");
        };
        assert_eq!(code, 1011);
        assert!(reason.as_str().starts_with("invalid homeserver response: xxx"));
        assert!(reason.as_str().ends_with("..."));
        assert_eq!(reason.len(), 103);

        assert!(h.next_frame().await.is_none());
        let conn = h.finished().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn client_close_ends_session() {
        let mut h = Harness::start(idle(), StreamConfig::default());
        let _ = h.next_json().await;

        h.to_server.send(Ok(Message::Close(None))).await.unwrap();
        let conn = h.finished().await;
        assert!(conn.shutdown_token().is_cancelled());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn client_disconnect_ends_session() {
        let mut h = Harness::start(idle(), StreamConfig::default());
        let _ = h.next_json().await;

        h.to_server.close_channel();
        let conn = h.finished().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn external_shutdown_ends_session() {
        let mut h = Harness::start(idle(), StreamConfig::default());
        let _ = h.next_json().await;

        h.conn.shutdown();
        let conn = h.finished().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn parked_pump_does_not_hold_tracker_open() {
        let mut h = Harness::start(idle(), StreamConfig::default());
        let _ = h.next_json().await;
        h.send_text(r#"{"id":"1","method":"ping"}"#).await;
        let _ = h.next_json().await;

        let tracker = h.tracker.clone();
        h.conn.shutdown();
        let _ = h.finished().await;

        let _ = tracker.close();
        tokio::time::timeout(TIMEOUT, tracker.wait())
            .await
            .expect("tracked tasks still running after the stream closed");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pong_ends_session() {
        let config = StreamConfig {
            ping_interval: Duration::from_secs(9),
            pong_wait: Duration::from_secs(10),
            ..StreamConfig::default()
        };
        let mut h = Harness::start(idle(), config);
        let _ = h.next_json().await;

        let started = tokio::time::Instant::now();
        while h.from_server.next().await.is_some() {}
        assert!(started.elapsed() >= Duration::from_secs(9));
        let conn = h.finished().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_session_alive() {
        let config = StreamConfig {
            ping_interval: Duration::from_secs(9),
            pong_wait: Duration::from_secs(10),
            ..StreamConfig::default()
        };
        let mut h = Harness::start(idle(), config);
        let _ = h.next_json().await;

        for _ in 0..5 {
            let frame = h.from_server.next().await;
            assert!(matches!(frame, Some(Message::Ping(_))), "{frame:?}");
            h.to_server
                .send(Ok(Message::Pong(Vec::new().into())))
                .await
                .unwrap();
        }
        assert!(!h.conn.shutdown_token().is_cancelled());
        assert_eq!(h.conn.state(), ConnectionState::Streaming);
    }
}
