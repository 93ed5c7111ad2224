use parking_lot::Mutex;
use sendspin::audio::{AudioFormat, OutputFactory, OutputStream, PullTiming, SharedPlayout};
use sendspin::error::Error;
use sendspin::protocol::messages::{roles, ConnectionReason, Message, Roles, ServerHello};
use sendspin::protocol::builder;
use sendspin::sync::MonotonicClock;
use sendspin::ws::{Connection, ConnectionEvents, Opcode, WebSocket, WebSocketConfig, WebSocketEvents};
use sendspin::{Player, PlayerConfig, SendspinServer, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(10);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `check` until it holds or the timeout expires
async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

struct Idle(AudioFormat);

impl OutputStream for Idle {
    fn format(&self) -> AudioFormat {
        self.0
    }
}

/// Hands out idle streams and keeps the playouts so tests can pull by hand
#[derive(Default)]
struct Capture {
    playouts: Mutex<Vec<(AudioFormat, SharedPlayout)>>,
}

impl OutputFactory for Capture {
    fn create(
        &self,
        format: AudioFormat,
        playout: SharedPlayout,
        _clock: MonotonicClock,
    ) -> sendspin::Result<Box<dyn OutputStream>> {
        self.playouts.lock().push((format, playout));
        Ok(Box::new(Idle(format)))
    }
}

fn local() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn test_server(name: &str) -> ServerConfig {
    ServerConfig::new(name)
        .bind_addr(local())
        .delay_secs(0.1)
        .chunk_interval_ms(10)
}

#[tokio::test]
async fn test_player_syncs_and_plays() {
    init_logging();
    let server = SendspinServer::with_config(test_server("Sender"));
    let addr = server.start().await.unwrap().unwrap();

    let capture = Arc::new(Capture::default());
    let player = Player::with_output(
        PlayerConfig::new("Test Player").server("127.0.0.1", addr.port()),
        capture.clone(),
    );
    assert_eq!(player.start().await.unwrap(), None);

    wait_for("player role", || {
        server
            .clients()
            .iter()
            .any(|c| c.roles.contains(Roles::PLAYER) && c.playing)
    })
    .await;
    let client = &server.clients()[0];
    assert_eq!(client.name.as_deref(), Some("Test Player"));
    assert_eq!(client.format, Some(AudioFormat::pcm(48000, 2, 16)));

    wait_for("time exchanges", || {
        player.sessions().iter().any(|s| s.time_exchanges >= 4)
    })
    .await;
    let session = &player.sessions()[0];
    assert!(session.active_roles.contains(Roles::PLAYER));
    assert!(session.active_roles.contains(Roles::METADATA));
    assert_eq!(session.server_name.as_deref(), Some("Sender"));
    assert_eq!(session.format, Some(AudioFormat::pcm(48000, 2, 16)));

    let (format, playout) = capture.playouts.lock()[0].clone();
    assert_eq!(format, AudioFormat::pcm(48000, 2, 16));
    wait_for("buffered audio", || playout.lock().buffered() > 40_000).await;

    // 10 ms per pull
    let clock = player.clock();
    let mut out = vec![0u8; 480 * 4];
    let first = playout.lock().process(
        &mut out,
        &PullTiming {
            now_us: clock.now_us_f64(),
            buffered_frames: 0,
            delay_us: 0.0,
        },
    );
    assert!(!first.silent, "first pull after sync should play");
    assert!(out.iter().any(|&b| b != 0));

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = playout.lock().process(
        &mut out,
        &PullTiming {
            now_us: clock.now_us_f64(),
            buffered_frames: 0,
            delay_us: 0.0,
        },
    );
    assert!(!second.silent);
    assert!(second.rate.is_finite());
    assert_ne!(second.rate, 1.0);

    player.stop().await;
    wait_for("sender to drop the client", || server.clients().is_empty()).await;
    server.stop().await;
}

#[tokio::test]
async fn test_single_server_policy() {
    init_logging();
    let player = Player::with_output(
        PlayerConfig::new("Policy Player").listen_addr(local()),
        Arc::new(Capture::default()),
    );
    let addr = player.start().await.unwrap().unwrap();

    let discovery = SendspinServer::with_config(
        test_server("First").receivers(vec!["127.0.0.1".into()], addr.port()),
    );
    discovery.start().await.unwrap();
    wait_for("first session", || {
        player
            .sessions()
            .iter()
            .any(|s| s.server_name.as_deref() == Some("First"))
    })
    .await;

    let playback = SendspinServer::with_config(
        test_server("Second")
            .receivers(vec!["127.0.0.1".into()], addr.port())
            .connection_reason(ConnectionReason::Playback),
    );
    playback.start().await.unwrap();
    wait_for("playback sender to take over", || {
        let sessions = player.sessions();
        sessions.len() == 1 && sessions[0].server_name.as_deref() == Some("Second")
    })
    .await;
    wait_for("first sender to lose its client", || {
        discovery.clients().is_empty()
    })
    .await;

    // a discovery sender arriving while another session is live leaves again
    let late = SendspinServer::with_config(
        test_server("Third").receivers(vec!["127.0.0.1".into()], addr.port()),
    );
    late.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(late.clients().is_empty(), "late sender kept its client");
    let sessions = player.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].server_name.as_deref(), Some("Second"));

    player.stop().await;
    for server in [discovery, playback, late] {
        server.stop().await;
    }
}

#[derive(Debug)]
enum Seen {
    Text(String),
    Disconnected,
}

/// Replies a scripted peer sends for one parsed message
type Script = Arc<dyn Fn(&Message) -> Vec<String> + Send + Sync>;

/// A hand-rolled peer that records what it receives and answers from a script
struct Scripted {
    opening: Option<String>,
    script: Script,
    seen: mpsc::UnboundedSender<Seen>,
}

impl WebSocketEvents for Scripted {
    fn connected(&self, _user: Option<u64>, conn: &Connection, _path: &str) {
        conn.add_observer(Arc::new(ScriptedSession {
            script: self.script.clone(),
            seen: self.seen.clone(),
        }));
        if let Some(text) = &self.opening {
            conn.send_text(text).unwrap();
        }
    }
}

struct ScriptedSession {
    script: Script,
    seen: mpsc::UnboundedSender<Seen>,
}

impl ConnectionEvents for ScriptedSession {
    fn message(&self, conn: &Connection, opcode: Opcode, payload: &[u8]) {
        if opcode != Opcode::Text {
            return;
        }
        let text = String::from_utf8_lossy(payload).to_string();
        if let Ok(message) = Message::parse(&text) {
            for reply in (self.script)(&message) {
                conn.send_text(&reply).unwrap();
            }
        }
        let _ = self.seen.send(Seen::Text(text));
    }

    fn error(&self, _conn: &Connection, _err: &Error) {}

    fn disconnected(&self, _conn: &Connection) {
        let _ = self.seen.send(Seen::Disconnected);
    }
}

/// Message kinds received until the other side hung up
///
/// Goodbyes carry their reason and stream/end its roles.
async fn kinds_until_disconnect(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Vec<String> {
    let mut kinds = Vec::new();
    loop {
        let event = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        let text = match event {
            Seen::Disconnected => return kinds,
            Seen::Text(text) => text,
        };
        let kind = match Message::parse(&text) {
            Ok(Message::ClientGoodbye(bye)) => format!("client/goodbye:{}", bye.reason),
            Ok(Message::StreamEnd(end)) => {
                format!("stream/end:{}", end.roles.unwrap_or_default().join(","))
            }
            Ok(other) => other.kind().to_string(),
            Err(e) => panic!("unparsable message {}: {}", text, e),
        };
        kinds.push(kind);
    }
}

fn server_hello(version: u32) -> String {
    builder::server_hello(&ServerHello {
        server_id: "scripted".into(),
        name: "Scripted Sender".into(),
        version,
        active_roles: vec![roles::PLAYER.into()],
        connection_reason: ConnectionReason::Playback,
    })
}

/// Run a player against a scripted sender; returns what the sender saw
async fn player_against(script: Script) -> Vec<String> {
    init_logging();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sender = WebSocket::new(WebSocketConfig::default());
    sender.add_observer(Arc::new(Scripted {
        opening: None,
        script,
        seen: tx,
    }));
    let addr = sender
        .listen(None, "127.0.0.1", 0, &["/sendspin".to_string()])
        .await
        .unwrap();

    let player = Player::with_output(
        PlayerConfig::new("Strict Player").server("127.0.0.1", addr.port()),
        Arc::new(Capture::default()),
    );
    player.start().await.unwrap();

    let kinds = kinds_until_disconnect(&mut rx).await;
    wait_for("player to forget the session", || player.sessions().is_empty()).await;
    player.stop().await;
    sender.shutdown();
    kinds
}

/// Run a scripted player against a sender; returns what the player saw
async fn sender_against(opening: String, script: Script) -> Vec<String> {
    init_logging();
    let server = SendspinServer::with_config(test_server("Strict Sender"));
    let addr = server.start().await.unwrap().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let player = WebSocket::new(WebSocketConfig::default());
    player.add_observer(Arc::new(Scripted {
        opening: Some(opening),
        script,
        seen: tx,
    }));
    player
        .connect(None, "127.0.0.1", addr.port(), "/sendspin")
        .await
        .unwrap();

    let kinds = kinds_until_disconnect(&mut rx).await;
    wait_for("sender to drop the client", || server.clients().is_empty()).await;
    player.shutdown();
    server.stop().await;
    kinds
}

fn client_hello(version: u32, formats: serde_json::Value) -> String {
    serde_json::json!({
        "type": "client/hello",
        "payload": {
            "client_id": "scripted-player",
            "name": "Scripted Player",
            "version": version,
            "supported_roles": ["player@v1", "metadata@v1"],
            "player@v1_support": {
                "supported_formats": formats,
                "buffer_capacity": 1_000_000,
            },
        },
    })
    .to_string()
}

fn pcm_offer() -> serde_json::Value {
    serde_json::json!([{"codec": "pcm", "channels": 2, "sample_rate": 48000, "bit_depth": 16}])
}

#[tokio::test]
async fn test_unsupported_version_says_goodbye() {
    let kinds = player_against(Arc::new(|message: &Message| match message {
        Message::ClientHello(_) => vec![server_hello(2)],
        _ => Vec::new(),
    }))
    .await;
    assert_eq!(kinds, vec!["client/hello", "client/goodbye:shutdown"]);
}

#[tokio::test]
async fn test_unknown_codec_says_goodbye() {
    let kinds = player_against(Arc::new(|message: &Message| match message {
        Message::ClientHello(_) => vec![server_hello(1)],
        Message::ClientState(_) => vec![serde_json::json!({
            "type": "stream/start",
            "payload": {"player": {"codec": "mp3", "channels": 2, "sample_rate": 44100}},
        })
        .to_string()],
        _ => Vec::new(),
    }))
    .await;
    assert_eq!(
        kinds,
        vec!["client/hello", "client/state", "client/goodbye:shutdown"]
    );
}

#[tokio::test]
async fn test_stream_start_missing_field_says_goodbye() {
    let kinds = player_against(Arc::new(|message: &Message| match message {
        Message::ClientHello(_) => vec![server_hello(1)],
        Message::ClientState(_) => {
            vec![r#"{"type":"stream/start","payload":{"player":{"codec":"pcm","channels":2}}}"#.to_string()]
        }
        _ => Vec::new(),
    }))
    .await;
    assert_eq!(
        kinds,
        vec!["client/hello", "client/state", "client/goodbye:shutdown"]
    );
}

#[tokio::test]
async fn test_sender_ends_stream_on_unsupported_version() {
    let kinds = sender_against(client_hello(2, pcm_offer()), Arc::new(|_: &Message| Vec::new())).await;
    assert_eq!(kinds, vec!["stream/end:player,metadata"]);
}

#[tokio::test]
async fn test_sender_ends_stream_without_usable_format() {
    let offer = serde_json::json!([
        {"codec": "flac", "channels": 2, "sample_rate": 48000, "bit_depth": 16},
        {"codec": "pcm", "channels": 2, "sample_rate": 48000, "bit_depth": 32},
    ]);
    let kinds = sender_against(client_hello(1, offer), Arc::new(|_: &Message| Vec::new())).await;
    assert_eq!(kinds, vec!["stream/end:player,metadata"]);
}

#[tokio::test]
async fn test_sender_ends_stream_on_missing_field() {
    let kinds = sender_against(
        client_hello(1, pcm_offer()),
        Arc::new(|message: &Message| match message {
            Message::ServerHello(_) => vec![r#"{"type":"client/time","payload":{}}"#.to_string()],
            _ => Vec::new(),
        }),
    )
    .await;
    assert_eq!(kinds, vec!["server/hello", "stream/end:player,metadata"]);
}

#[tokio::test]
async fn test_sender_streams_for_unknown_player_state() {
    init_logging();
    let server = SendspinServer::with_config(test_server("Lenient Sender"));
    let addr = server.start().await.unwrap().unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    let player = WebSocket::new(WebSocketConfig::default());
    player.add_observer(Arc::new(Scripted {
        opening: Some(client_hello(1, pcm_offer())),
        script: Arc::new(|message: &Message| match message {
            Message::ServerHello(_) => vec![
                r#"{"type":"client/state","payload":{"player":{"state":"buffering"}}}"#.to_string(),
            ],
            _ => Vec::new(),
        }),
        seen: tx,
    }));
    player
        .connect(None, "127.0.0.1", addr.port(), "/sendspin")
        .await
        .unwrap();

    wait_for("stream for a player in an unknown state", || {
        server.clients().iter().any(|c| c.playing)
    })
    .await;
    player.shutdown();
    server.stop().await;
}
