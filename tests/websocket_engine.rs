use sendspin::error::Error;
use sendspin::ws::{Connection, ConnectionEvents, Opcode, WebSocket, WebSocketConfig, WebSocketEvents};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Event {
    Connected(u64, String),
    Message(Opcode, Vec<u8>),
    Error(String),
    Disconnected,
}

/// Forwards every event into a channel
struct Recorder(mpsc::UnboundedSender<Event>);

impl WebSocketEvents for Recorder {
    fn connected(&self, _user: Option<u64>, conn: &Connection, path: &str) {
        let _ = self.0.send(Event::Connected(conn.id(), path.to_string()));
    }
}

impl ConnectionEvents for Recorder {
    fn message(&self, _conn: &Connection, opcode: Opcode, payload: &[u8]) {
        let _ = self.0.send(Event::Message(opcode, payload.to_vec()));
    }

    fn error(&self, _conn: &Connection, err: &Error) {
        let _ = self.0.send(Event::Error(err.to_string()));
    }

    fn disconnected(&self, _conn: &Connection) {
        let _ = self.0.send(Event::Disconnected);
    }
}

/// Sends every data frame straight back
struct Echo;

impl ConnectionEvents for Echo {
    fn message(&self, conn: &Connection, opcode: Opcode, payload: &[u8]) {
        conn.send(opcode, &[payload]).unwrap();
    }
}

struct AttachEcho;

impl WebSocketEvents for AttachEcho {
    fn connected(&self, _user: Option<u64>, conn: &Connection, _path: &str) {
        conn.add_observer(Arc::new(Echo));
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn echo_server() -> (WebSocket, SocketAddr) {
    let server = WebSocket::new(WebSocketConfig::default());
    server.add_observer(Arc::new(AttachEcho));
    let addr = server
        .listen(Some(1), "127.0.0.1", 0, &["/echo".to_string()])
        .await
        .unwrap();
    (server, addr)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

/// Connect a client and wait for its upgrade
async fn connect(
    addr: SocketAddr,
    path: &str,
) -> (WebSocket, Connection, mpsc::UnboundedReceiver<Event>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = WebSocket::new(WebSocketConfig::default());
    client.add_observer(Arc::new(Recorder(tx.clone())));
    let conn = client
        .connect(Some(2), "127.0.0.1", addr.port(), path)
        .await
        .unwrap();
    conn.add_observer(Arc::new(Recorder(tx)));
    (client, conn, rx)
}

#[tokio::test]
async fn test_echo_text_and_binary() {
    init_logging();
    let (server, addr) = echo_server().await;
    let (_client, conn, mut rx) = connect(addr, "/echo").await;

    match next(&mut rx).await {
        Event::Connected(id, path) => {
            assert_eq!(id, conn.id());
            assert_eq!(path, "/echo");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(conn.is_connected());

    conn.send_text("hello").unwrap();
    let big = vec![7u8; 70_000];
    conn.send(Opcode::Binary, &[&big[..100], &big[100..]]).unwrap();

    match next(&mut rx).await {
        Event::Message(Opcode::Text, payload) => assert_eq!(payload, b"hello"),
        other => panic!("unexpected {:?}", other),
    }
    match next(&mut rx).await {
        Event::Message(Opcode::Binary, payload) => assert_eq!(payload, big),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    init_logging();
    let (_server, addr) = echo_server().await;
    let (_client, conn, mut rx) = connect(addr, "/echo").await;
    assert!(matches!(next(&mut rx).await, Event::Connected(..)));

    conn.send(Opcode::Ping, &[b"are you there"]).unwrap();
    match next(&mut rx).await {
        Event::Message(Opcode::Pong, payload) => assert_eq!(payload, b"are you there"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_path_is_refused() {
    init_logging();
    let (_server, addr) = echo_server().await;
    let (_client, conn, mut rx) = connect(addr, "/elsewhere").await;

    match next(&mut rx).await {
        Event::Error(message) => assert!(message.contains("404"), "{}", message),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(next(&mut rx).await, Event::Disconnected));
    assert!(conn.is_disconnected());
}

#[tokio::test]
async fn test_close_from_peer_disconnects() {
    init_logging();
    let (server, addr) = echo_server().await;
    let (_client, conn, mut rx) = connect(addr, "/echo").await;
    assert!(matches!(next(&mut rx).await, Event::Connected(..)));

    conn.send(Opcode::Close, &[&1000u16.to_be_bytes()]).unwrap();
    loop {
        match next(&mut rx).await {
            Event::Disconnected => break,
            Event::Message(..) | Event::Error(_) => continue,
            other => panic!("unexpected {:?}", other),
        }
    }

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while server.connection_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "server kept the connection");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_cancel_by_user_tag() {
    init_logging();
    let (server, addr) = echo_server().await;
    let (client, conn, mut rx) = connect(addr, "/echo").await;
    assert!(matches!(next(&mut rx).await, Event::Connected(..)));

    assert_eq!(client.cancel(Some(99)), 0);
    assert_eq!(client.cancel(Some(2)), 1);
    assert!(conn.is_disconnected());
    assert_eq!(client.connection_count(), 0);

    // the listening server is tagged 1 and takes its accepted connection with it
    assert_eq!(server.cancel(Some(1)), 1);
    assert_eq!(server.connection_count(), 0);
}
