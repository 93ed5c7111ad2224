// ABOUTME: One WebSocket connection: outbound queue, reply correlation and events
// ABOUTME: A readiness-driven task owns the socket and resumes parsers on each read

use crate::error::Error;
use crate::ws::engine::{EngineInner, ServerInner, WebSocketConfig};
use crate::ws::frame::{encode_frame, FrameDecoder, Opcode};
use crate::ws::handshake::{
    build_error_response, build_upgrade_response, HttpReply, HttpRequest, ReplyParser,
    RequestParser,
};
use crate::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// Largest single read from the socket
const READ_CHUNK: usize = 64 * 1024;

/// Callback run when the HTTP reply to a queued request arrives
pub type ReplyCallback = Box<dyn FnOnce(&Connection, &HttpReply) -> Result<()> + Send>;

/// Which side of the TCP connection we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We connected; outgoing frames are masked
    Initiator,
    /// We accepted; outgoing frames are not masked
    Acceptor,
}

/// Connection-level events
///
/// Observers are called in registration order, on the connection's task,
/// with no internal lock held. Any of them may send, disconnect or destroy
/// the connection.
pub trait ConnectionEvents: Send + Sync {
    /// A data frame arrived (control frames are handled internally)
    fn message(&self, _conn: &Connection, _opcode: Opcode, _payload: &[u8]) {}

    /// A transport or protocol error; a disconnect follows
    fn error(&self, _conn: &Connection, _err: &Error) {}

    /// The socket is closed; emitted once
    fn disconnected(&self, _conn: &Connection) {}

    /// The outbound queue became empty
    fn drained(&self, _conn: &Connection) {}

    /// The connection is being destroyed
    fn destroy(&self, _conn: &Connection) {}
}

/// One queued outbound buffer
struct Message {
    data: Vec<u8>,
    offset: usize,
    seq: u64,
    reply: Option<ReplyCallback>,
}

#[derive(Default)]
struct ConnState {
    messages: VecDeque<Message>,
    pending: VecDeque<Message>,
    send_seq: u64,
    recv_seq: u64,
    path: String,
    peer: Option<SocketAddr>,
    upgraded: bool,
    draining: bool,
    disconnected: bool,
    destroyed: bool,
}

pub(crate) enum Owner {
    Engine(Weak<EngineInner>),
    Server(Weak<ServerInner>),
}

pub(crate) struct ConnInner {
    id: u64,
    role: Role,
    user: Option<u64>,
    config: Arc<WebSocketConfig>,
    owner: Owner,
    engine: Weak<EngineInner>,
    state: Mutex<ConnState>,
    observers: Mutex<Vec<Arc<dyn ConnectionEvents>>>,
    wake: Notify,
}

/// Handle to a WebSocket connection
///
/// Cloning is cheap; every clone refers to the same connection. The socket
/// itself lives in a task that exits once the connection is disconnected.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("peer", &self.peer_addr())
            .finish()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl Connection {
    pub(crate) fn new(
        id: u64,
        role: Role,
        user: Option<u64>,
        config: Arc<WebSocketConfig>,
        owner: Owner,
        engine: Weak<EngineInner>,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                id,
                role,
                user,
                config,
                owner,
                engine,
                state: Mutex::new(ConnState {
                    peer,
                    ..Default::default()
                }),
                observers: Mutex::new(Vec::new()),
                wake: Notify::new(),
            }),
        }
    }

    /// Engine-unique connection id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether we initiated or accepted
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Opaque tag given to `listen` or `connect`
    pub fn user(&self) -> Option<u64> {
        self.inner.user
    }

    /// Remote address, once known
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.state.lock().peer
    }

    /// Request path of the upgrade
    pub fn path(&self) -> String {
        self.inner.state.lock().path.clone()
    }

    /// True after the upgrade completed and until disconnect
    pub fn is_connected(&self) -> bool {
        let state = self.inner.state.lock();
        state.upgraded && !state.disconnected
    }

    /// True once the socket is closed
    pub fn is_disconnected(&self) -> bool {
        self.inner.state.lock().disconnected
    }

    /// Number of buffers waiting to be written
    pub fn queued(&self) -> usize {
        self.inner.state.lock().messages.len()
    }

    /// Subscribe to connection events
    pub fn add_observer(&self, observer: Arc<dyn ConnectionEvents>) {
        self.inner.observers.lock().push(observer);
    }

    /// Unsubscribe a previously added observer
    pub fn remove_observer(&self, observer: &Arc<dyn ConnectionEvents>) {
        self.inner
            .observers
            .lock()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    fn emit(&self, f: impl Fn(&dyn ConnectionEvents)) {
        let observers = self.inner.observers.lock().clone();
        for observer in &observers {
            f(observer.as_ref());
        }
    }

    pub(crate) fn emit_error(&self, err: &Error) {
        self.emit(|o| o.error(self, err));
    }

    pub(crate) fn set_peer(&self, peer: SocketAddr) {
        self.inner.state.lock().peer = Some(peer);
    }

    /// Queue raw bytes, optionally expecting a correlated HTTP reply
    pub(crate) fn queue(&self, data: Vec<u8>, reply: Option<ReplyCallback>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.disconnected {
            return Err(Error::Connection(format!(
                "connection {} is closed",
                self.inner.id
            )));
        }
        let seq = if reply.is_some() {
            let seq = state.send_seq;
            state.send_seq += 1;
            seq
        } else {
            0
        };
        state.messages.push_back(Message {
            data,
            offset: 0,
            seq,
            reply,
        });
        drop(state);
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Send one frame built from `buffers`
    pub fn send(&self, opcode: Opcode, buffers: &[&[u8]]) -> Result<()> {
        let mask = match self.inner.role {
            Role::Initiator => Some(rand::random::<[u8; 4]>()),
            Role::Acceptor => None,
        };
        self.queue(encode_frame(opcode, buffers, mask), None)
    }

    /// Send a text frame
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(Opcode::Text, &[text.as_bytes()])
    }

    /// Close the connection
    ///
    /// With `drain` and data still queued the connection is closed once the
    /// queue has been written out.
    pub fn disconnect(&self, drain: bool) {
        let mut state = self.inner.state.lock();
        if state.disconnected {
            return;
        }
        if drain && !state.messages.is_empty() {
            state.draining = true;
            drop(state);
            self.inner.wake.notify_one();
            return;
        }
        state.disconnected = true;
        state.draining = false;
        state.messages.clear();
        state.pending.clear();
        drop(state);

        self.inner.wake.notify_one();
        self.detach();
        log::debug!("connection {} disconnected", self.inner.id);
        self.emit(|o| o.disconnected(self));
    }

    /// Remove from the owner, emit `destroy` and close without draining
    pub fn destroy(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        self.detach();
        self.emit(|o| o.destroy(self));
        self.disconnect(false);
        self.inner.observers.lock().clear();
    }

    fn detach(&self) {
        let id = self.inner.id;
        match &self.inner.owner {
            Owner::Engine(engine) => {
                if let Some(engine) = engine.upgrade() {
                    engine.remove_connection(id);
                }
            }
            Owner::Server(server) => {
                if let Some(server) = server.upgrade() {
                    server.remove_connection(id);
                }
            }
        }
    }

    /// Mark the upgrade done and announce the connection
    pub(crate) fn complete_upgrade(&self, path: &str) {
        {
            let mut state = self.inner.state.lock();
            state.path = path.to_string();
            state.upgraded = true;
        }
        log::debug!(
            "connection {} upgraded on '{}' ({:?})",
            self.inner.id,
            path,
            self.inner.role
        );
        if let Some(engine) = self.inner.engine.upgrade() {
            engine.emit_connected(self.inner.user, self, path);
        }
    }

    fn is_upgraded(&self) -> bool {
        self.inner.state.lock().upgraded
    }

    fn wants_write(&self) -> bool {
        let state = self.inner.state.lock();
        !state.messages.is_empty()
    }

    fn take_pending_reply(&self) -> Result<Message> {
        let mut state = self.inner.state.lock();
        let seq = state.recv_seq;
        state.recv_seq += 1;
        let pos = state
            .pending
            .iter()
            .position(|m| m.seq == seq)
            .ok_or_else(|| Error::Protocol(format!("unexpected HTTP reply (seq {})", seq)))?;
        state
            .pending
            .remove(pos)
            .ok_or_else(|| Error::Protocol("pending reply vanished".into()))
    }

    /// Write queued data until the socket would block
    fn flush(&self, stream: &TcpStream) -> Result<()> {
        let mut state = self.inner.state.lock();
        let had_data = !state.messages.is_empty();
        while let Some(msg) = state.messages.front_mut() {
            match stream.try_write(&msg.data[msg.offset..]) {
                Ok(0) => return Err(Error::Io(ErrorKind::WriteZero.into())),
                Ok(n) => {
                    msg.offset += n;
                    if msg.offset < msg.data.len() {
                        continue;
                    }
                    if let Some(done) = state.messages.pop_front() {
                        if done.reply.is_some() {
                            state.pending.push_back(done);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let draining = state.draining;
        drop(state);

        if had_data {
            self.emit(|o| o.drained(self));
        }
        if draining {
            self.disconnect(false);
        }
        Ok(())
    }
}

/// Which parser consumes the next input bytes
pub(crate) enum InputParser {
    Request(RequestParser),
    Reply(ReplyParser),
    Frames(FrameDecoder),
    Discard,
}

impl InputParser {
    fn wanted(&self) -> usize {
        match self {
            InputParser::Request(p) => p.wanted(),
            InputParser::Reply(p) => p.wanted(),
            InputParser::Frames(p) => p.wanted(),
            InputParser::Discard => READ_CHUNK,
        }
    }
}

/// What the driver needs besides the connection itself
pub(crate) struct Driver {
    conn: Connection,
    parser: InputParser,
    /// Accepted paths for incoming upgrades; empty accepts any
    paths: Arc<[String]>,
}

enum ReadOutcome {
    WouldBlock,
    Eof,
    Closed,
}

impl Driver {
    pub(crate) fn acceptor(conn: Connection, paths: Arc<[String]>) -> Self {
        Self {
            conn,
            parser: InputParser::Request(RequestParser::new()),
            paths,
        }
    }

    pub(crate) fn initiator(conn: Connection, expected_accept: String) -> Self {
        let max_body =
            usize::try_from(conn.inner.config.max_frame_size).unwrap_or(usize::MAX);
        Self {
            parser: InputParser::Reply(ReplyParser::new(Some(expected_accept)).max_body(max_body)),
            conn,
            paths: Arc::from(Vec::new()),
        }
    }

    /// Serve the socket until the connection is disconnected
    pub(crate) async fn run(mut self, stream: TcpStream) {
        let conn = self.conn.clone();
        let mut buf = vec![0u8; READ_CHUNK];

        let result: Result<()> = loop {
            if conn.is_disconnected() {
                break Ok(());
            }
            let interest = if conn.wants_write() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            let ready = tokio::select! {
                ready = stream.ready(interest) => match ready {
                    Ok(ready) => ready,
                    Err(e) => break Err(e.into()),
                },
                _ = conn.inner.wake.notified() => continue,
            };

            if ready.is_readable() || ready.is_read_closed() {
                match self.read_input(&stream, &mut buf) {
                    Ok(ReadOutcome::WouldBlock) => {}
                    Ok(ReadOutcome::Eof) => {
                        log::debug!("connection {} closed by peer", conn.id());
                        break Ok(());
                    }
                    Ok(ReadOutcome::Closed) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }
            if ready.is_writable() {
                if let Err(e) = conn.flush(&stream) {
                    break Err(e);
                }
            }
        };

        if let Err(err) = result {
            log::warn!("connection {}: {}", conn.id(), err);
            conn.emit_error(&err);
        }
        conn.disconnect(false);
    }

    fn read_input(&mut self, stream: &TcpStream, buf: &mut [u8]) -> Result<ReadOutcome> {
        loop {
            if self.conn.is_disconnected() {
                return Ok(ReadOutcome::Closed);
            }
            let want = self.parser.wanted().clamp(1, buf.len());
            let n = match stream.try_read(&mut buf[..want]) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.process(&buf[..n])?;
        }
    }

    fn process(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.parser {
            InputParser::Request(parser) => {
                if let Some(request) = parser.push(data)? {
                    self.handle_request(request)?;
                }
            }
            InputParser::Reply(parser) => {
                if let Some(reply) = parser.push(data)? {
                    self.handle_reply(reply)?;
                }
            }
            InputParser::Frames(decoder) => {
                if let Some(frame) = decoder.push(data)? {
                    self.handle_frame(frame.opcode, &frame.payload)?;
                }
            }
            InputParser::Discard => {}
        }
        Ok(())
    }

    fn handle_request(&mut self, request: HttpRequest) -> Result<()> {
        let config = &self.conn.inner.config;
        log::debug!(
            "connection {}: GET {} HTTP/{}.{}",
            self.conn.id(),
            request.path,
            request.version.0,
            request.version.1
        );

        if !self.paths.is_empty() && !self.paths.iter().any(|p| *p == request.path) {
            log::info!(
                "connection {}: refusing unknown path '{}'",
                self.conn.id(),
                request.path
            );
            return self.refuse(404, "Not Found");
        }
        let Some(key) = request.websocket_key() else {
            log::info!("connection {}: request without key", self.conn.id());
            return self.refuse(400, "Bad Request");
        };

        let response = build_upgrade_response(key, &config.server_name);
        self.conn.queue(response.into_bytes(), None)?;
        self.parser = InputParser::Frames(FrameDecoder::new(config.max_frame_size));
        self.conn.complete_upgrade(&request.path);
        Ok(())
    }

    fn refuse(&mut self, status: u16, reason: &str) -> Result<()> {
        let response = build_error_response(status, reason, &self.conn.inner.config.server_name);
        self.conn.queue(response.into_bytes(), None)?;
        self.parser = InputParser::Discard;
        self.conn.disconnect(true);
        Ok(())
    }

    fn handle_reply(&mut self, reply: HttpReply) -> Result<()> {
        let msg = self.conn.take_pending_reply()?;
        if let Some(callback) = msg.reply {
            callback(&self.conn, &reply)?;
        }
        if self.conn.is_upgraded() {
            self.parser = InputParser::Frames(FrameDecoder::new(
                self.conn.inner.config.max_frame_size,
            ));
        }
        Ok(())
    }

    fn handle_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        match opcode {
            Opcode::Ping => self.conn.send(Opcode::Pong, &[payload]),
            Opcode::Close => {
                log::debug!("connection {}: close received", self.conn.id());
                if let Err(e) = self.conn.send(Opcode::Close, &[payload]) {
                    log::debug!("connection {}: close reply not sent: {}", self.conn.id(), e);
                }
                self.parser = InputParser::Discard;
                self.conn.disconnect(true);
                Ok(())
            }
            _ => {
                let conn = &self.conn;
                conn.emit(|o| o.message(conn, opcode, payload));
                Ok(())
            }
        }
    }
}
