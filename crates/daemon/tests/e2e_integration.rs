//! End-to-end integration tests for TermBridge.
//!
//! These tests run the real WebSocket server on an ephemeral port with a
//! scripted engine and talk to it with tokio-tungstenite clients:
//! - Driver and observer roles on the command endpoints
//! - Status events on the status endpoint
//! - Session destruction and driver takeover
//! - Server shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use daemon::config::Config;
use daemon::engine::{EngineCommand, ScriptedEngine, ScriptedProcess};
use daemon::server::TermServer;
use daemon::session::{SessionRegistry, SessionSettings};
use futures_util::{SinkExt, StreamExt};
use protocol::{TaskStatus, TermAction};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    engine: Arc<ScriptedEngine>,
    spawned: mpsc::UnboundedReceiver<ScriptedProcess>,
    shutdown: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    async fn start() -> Self {
        let (engine, spawned) = ScriptedEngine::new();
        let engine = Arc::new(engine);
        let registry = Arc::new(SessionRegistry::new(
            engine.clone(),
            SessionSettings::default(),
        ));

        let mut config = Config::default();
        config.server.port = 0;
        let server = TermServer::bind(&config, registry.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let server = tokio::spawn(async move { server.run(token).await });

        Self {
            addr,
            registry,
            engine,
            spawned,
            shutdown,
            server,
        }
    }

    async fn connect(&self, path: &str) -> Ws {
        let url = format!("ws://{}{}", self.addr, path);
        let (ws, _) = connect_async(url.as_str()).await.unwrap();
        ws
    }

    async fn next_process(&mut self) -> ScriptedProcess {
        timeout(Duration::from_secs(5), self.spawned.recv())
            .await
            .expect("timed out waiting for engine spawn")
            .expect("engine dropped")
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

async fn next_message(ws: &mut Ws) -> Message {
    timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("connection ended")
        .expect("connection error")
}

async fn next_binary(ws: &mut Ws) -> Vec<u8> {
    match next_message(ws).await {
        Message::Binary(data) => data,
        other => panic!("expected binary frame, got {:?}", other),
    }
}

async fn next_text(ws: &mut Ws) -> String {
    match next_message(ws).await {
        Message::Text(text) => text,
        other => panic!("expected text frame, got {:?}", other),
    }
}

async fn send_command(ws: &mut Ws, command: &str) {
    let json = TermAction::command(command).to_json().unwrap();
    ws.send(Message::Binary(json.into_bytes())).await.unwrap();
}

// =============================================================================
// Command Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_driver_receives_ready_marker_and_submits_command() {
    let mut harness = Harness::start().await;

    let mut driver = harness.connect("/socket/term/c1").await;
    let mut process = harness.next_process().await;
    assert_eq!(process.context(), "c1");

    assert_eq!(next_binary(&mut driver).await, b"% ");

    send_command(&mut driver, "echo hi").await;
    let command = timeout(Duration::from_secs(5), process.next_command())
        .await
        .unwrap();
    assert_eq!(command, Some(EngineCommand::Input(b"echo hi\n".to_vec())));
}

#[tokio::test]
async fn test_text_endpoint_sends_text_frames() {
    let mut harness = Harness::start().await;

    let mut driver = harness.connect("/socket/text/c2").await;
    let process = harness.next_process().await;

    assert_eq!(next_text(&mut driver).await, "% ");
    process.output("h\u{e9}llo").await;
    assert_eq!(next_text(&mut driver).await, "h\u{e9}llo");
}

#[tokio::test]
async fn test_second_connection_observes_with_completion_marker() {
    let mut harness = Harness::start().await;

    let mut driver = harness.connect("/socket/term/c3").await;
    let process = harness.next_process().await;
    assert_eq!(next_binary(&mut driver).await, b"% ");

    let mut observer = harness.connect("/socket/term/c3").await;
    let session = harness.registry.get("c3").unwrap();
    eventually(|| {
        let session = session.clone();
        async move { session.read_only_count().await == 1 }
    })
    .await;
    assert_eq!(harness.engine.spawn_count(), 1);

    process.status(1, TaskStatus::New, TaskStatus::Running).await;
    process.output("compiling\r\n").await;
    process.status(1, TaskStatus::Running, TaskStatus::Done).await;
    process.ready().await;

    assert_eq!(next_binary(&mut observer).await, b"compiling\r\n");
    assert_eq!(
        next_binary(&mut observer).await,
        b"% # Finished with status: DONE\r\n"
    );
    assert_eq!(next_binary(&mut observer).await, b"% ");

    assert_eq!(next_binary(&mut driver).await, b"compiling\r\n");
    assert_eq!(next_binary(&mut driver).await, b"% ");
}

#[tokio::test]
async fn test_read_only_envelopes_are_ignored() {
    let mut harness = Harness::start().await;

    let mut driver = harness.connect("/socket/term/c4").await;
    let mut process = harness.next_process().await;
    assert_eq!(next_binary(&mut driver).await, b"% ");

    let mut observer = harness.connect("/socket/term/c4/ro").await;
    let session = harness.registry.get("c4").unwrap();
    eventually(|| {
        let session = session.clone();
        async move { session.read_only_count().await == 1 }
    })
    .await;

    send_command(&mut observer, "rm -rf /").await;
    sleep(Duration::from_millis(100)).await;
    send_command(&mut driver, "ls").await;

    let command = timeout(Duration::from_secs(5), process.next_command())
        .await
        .unwrap();
    assert_eq!(command, Some(EngineCommand::Input(b"ls\n".to_vec())));
}

#[tokio::test]
async fn test_unknown_path_is_rejected() {
    let harness = Harness::start().await;

    let url = format!("ws://{}/socket/shell/c5", harness.addr);
    match connect_async(url.as_str()).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 404);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("handshake should have been rejected"),
    }
    assert!(harness.registry.is_empty());
}

// =============================================================================
// Status Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_status_listener_receives_events() {
    let mut harness = Harness::start().await;

    let mut listener = harness.connect("/socket/process-status-updates/c6").await;
    eventually(|| {
        let registry = harness.registry.clone();
        async move {
            match registry.get("c6") {
                Some(session) => session.listener_count().await == 1,
                None => false,
            }
        }
    })
    .await;

    let _driver = harness.connect("/socket/term/c6").await;
    let process = harness.next_process().await;

    process.status(7, TaskStatus::New, TaskStatus::Running).await;
    process.status(7, TaskStatus::Running, TaskStatus::Done).await;

    assert_eq!(
        next_text(&mut listener).await,
        r#"{"action":"status-update","event":{"taskId":"7","oldStatus":"NEW","newStatus":"RUNNING","context":"c6"}}"#
    );
    assert_eq!(
        next_text(&mut listener).await,
        r#"{"action":"status-update","event":{"taskId":"7","oldStatus":"RUNNING","newStatus":"DONE","context":"c6"}}"#
    );
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_idle_driver_disconnect_destroys_session() {
    let mut harness = Harness::start().await;

    let mut driver = harness.connect("/socket/term/c7").await;
    let mut process = harness.next_process().await;
    let first = harness.registry.get("c7").unwrap();

    driver.close(None).await.unwrap();

    let registry = harness.registry.clone();
    eventually(move || {
        let registry = registry.clone();
        async move { !registry.contains("c7") }
    })
    .await;
    assert!(first.is_destroyed());

    let command = timeout(Duration::from_secs(5), process.next_command())
        .await
        .unwrap();
    assert_eq!(command, Some(EngineCommand::Shutdown));

    // A new connection gets a new session and a new engine.
    let _driver = harness.connect("/socket/term/c7").await;
    harness.next_process().await;
    let second = harness.registry.get("c7").unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(harness.engine.spawn_count(), 2);
}

#[tokio::test]
async fn test_takeover_continues_live_output() {
    let mut harness = Harness::start().await;

    let mut first = harness.connect("/socket/term/c8").await;
    let mut process = harness.next_process().await;
    assert_eq!(next_binary(&mut first).await, b"% ");

    let session = harness.registry.get("c8").unwrap();
    process.status(3, TaskStatus::New, TaskStatus::Running).await;
    eventually(|| {
        let session = session.clone();
        async move { session.is_active().await }
    })
    .await;

    first.close(None).await.unwrap();
    eventually(|| {
        let session = session.clone();
        async move { !session.has_open_driver().await }
    })
    .await;
    assert!(!session.is_destroyed());

    let mut second = harness.connect("/socket/term/c8").await;
    eventually(|| {
        let session = session.clone();
        async move { session.has_open_driver().await }
    })
    .await;

    // Nothing is replayed: the first frame is fresh output.
    process.output("step 2\r\n").await;
    assert_eq!(next_binary(&mut second).await, b"step 2\r\n");

    send_command(&mut second, "y").await;
    let command = timeout(Duration::from_secs(5), process.next_command())
        .await
        .unwrap();
    assert_eq!(command, Some(EngineCommand::Input(b"y\n".to_vec())));
    assert_eq!(harness.engine.spawn_count(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_connections_and_sessions() {
    let mut harness = Harness::start().await;

    let mut driver = harness.connect("/socket/term/c9").await;
    harness.next_process().await;
    assert_eq!(next_binary(&mut driver).await, b"% ");
    let session = harness.registry.get("c9").unwrap();

    harness.shutdown.cancel();
    harness.server.await.unwrap().unwrap();

    assert!(session.is_destroyed());
    assert!(harness.registry.is_empty());

    let frame = timeout(Duration::from_secs(5), driver.next())
        .await
        .expect("timed out waiting for close");
    assert!(
        matches!(frame, None | Some(Ok(Message::Close(_))) | Some(Err(_))),
        "unexpected frame: {:?}",
        frame
    );
}
