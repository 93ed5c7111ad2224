// ABOUTME: Sender side of one client connection
// ABOUTME: Role and format negotiation, time replies and the per-client audio stream

use crate::audio::types::{AudioFormat, Sample};
use crate::error::Error;
use crate::protocol::builder;
use crate::protocol::messages::{
    ClientGoodbye, ClientHello, ClientState, ClientTime, GroupUpdate, Message, MetadataState,
    PlaybackState, Roles, ServerHello, ServerState, ServerTime, StreamEnd, StreamRequestFormat,
    StreamStart, PROTOCOL_VERSION,
};
use crate::protocol::AudioChunk;
use crate::server::audio_source::{AudioSource, SourceFactory};
use crate::server::client_manager::ClientManager;
use crate::server::config::ServerConfig;
use crate::server::encoder::{can_encode, create_encoder, AudioEncoder};
use crate::sync::MonotonicClock;
use crate::ws::{Connection, ConnectionEvents, Opcode};
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// A stream that fell this far behind restarts its timeline
const MAX_LAG_US: u64 = 1_000_000;
/// Upper bound on chunks produced per tick while catching up
const MAX_CHUNKS_PER_TICK: usize = 50;

/// State shared by every client of one sender
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) clock: MonotonicClock,
    pub(crate) sources: Arc<dyn SourceFactory>,
    pub(crate) clients: Arc<ClientManager>,
}

/// Snapshot of a client for reporting
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Connection id
    pub id: u64,
    /// Id from client/hello
    pub client_id: Option<String>,
    /// Name from client/hello
    pub name: Option<String>,
    /// Active roles
    pub roles: Roles,
    /// Negotiated stream format
    pub format: Option<AudioFormat>,
    /// Whether audio is being sent
    pub playing: bool,
    /// Last reported volume
    pub volume: Option<u8>,
    /// Last reported mute state
    pub muted: Option<bool>,
}

struct OutStream {
    source: Box<dyn AudioSource>,
    encoder: Box<dyn AudioEncoder>,
    start_ts: u64,
    frames_sent: u64,
    next_ts: u64,
}

impl OutStream {
    fn restart(&mut self, at: u64) {
        self.start_ts = at;
        self.frames_sent = 0;
        self.next_ts = at;
    }
}

#[derive(Default)]
struct ClientStateInner {
    client_id: Option<String>,
    name: Option<String>,
    roles: Roles,
    format: Option<AudioFormat>,
    stream: Option<OutStream>,
    playing: bool,
    volume: Option<u8>,
    muted: Option<bool>,
    closed: bool,
}

/// Sender side of one connection
pub struct ClientSession {
    ctx: Arc<ServerContext>,
    conn: Connection,
    state: Mutex<ClientStateInner>,
}

impl ClientSession {
    pub(crate) fn new(ctx: Arc<ServerContext>, conn: Connection) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            conn,
            state: Mutex::new(ClientStateInner::default()),
        })
    }

    /// The underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Id from client/hello, once received
    pub fn client_id(&self) -> Option<String> {
        self.state.lock().client_id.clone()
    }

    /// Whether the player role is active
    pub fn is_player(&self) -> bool {
        self.state.lock().roles.contains(Roles::PLAYER)
    }

    /// Reporting snapshot
    pub fn info(&self) -> ClientInfo {
        let state = self.state.lock();
        ClientInfo {
            id: self.conn.id(),
            client_id: state.client_id.clone(),
            name: state.name.clone(),
            roles: state.roles,
            format: state.format,
            playing: state.playing,
            volume: state.volume,
            muted: state.muted,
        }
    }

    pub(crate) fn send_text(&self, text: &str) {
        log::debug!("client {} -> {}", self.conn.id(), text);
        if let Err(e) = self.conn.send_text(text) {
            log::debug!("client {}: send failed: {}", self.conn.id(), e);
        }
    }

    /// Restart the stream timeline so no stale audio is sent
    pub(crate) fn clear_stream(&self) {
        let at = self.ctx.clock.now_us() + self.ctx.config.delay_us();
        if let Some(stream) = self.state.lock().stream.as_mut() {
            stream.source.reset();
            stream.restart(at);
        }
    }

    /// Stop sending audio
    pub(crate) fn end_stream(&self) {
        let mut state = self.state.lock();
        state.stream = None;
        state.playing = false;
    }

    /// End the stream and close once the queue is written
    pub(crate) fn close(&self) {
        self.end_stream();
        self.send_text(&builder::stream_end(&StreamEnd {
            roles: Some(vec!["player".to_string(), "metadata".to_string()]),
        }));
        self.conn.disconnect(true);
    }

    pub(crate) fn teardown(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.stream = None;
            state.playing = false;
        }
        self.ctx.clients.remove_client(self.conn.id());
        log::info!("client {} closed", self.conn.id());
        self.conn.destroy();
    }

    /// Send the audio due before `now + delay + interval`
    pub(crate) fn pump(&self, now_us: u64, interval_us: u64) {
        let delay = self.ctx.config.delay_us();
        let mut chunks = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.playing {
                return;
            }
            let Some(format) = state.format else {
                return;
            };
            let Some(stream) = state.stream.as_mut() else {
                return;
            };

            let rate = format.sample_rate.max(1) as u64;
            let head = now_us + delay;
            if stream.next_ts + MAX_LAG_US < head {
                log::warn!(
                    "client {}: stream fell {} ms behind, restarting timeline",
                    self.conn.id(),
                    (head - stream.next_ts) / 1000
                );
                stream.restart(head);
            }

            let frames = ((rate * interval_us) / 1_000_000).max(1) as usize;
            let horizon = head + interval_us;
            while stream.next_ts < horizon && chunks.len() < MAX_CHUNKS_PER_TICK {
                let samples = stream.source.read_chunk(frames).unwrap_or_else(|| {
                    vec![Sample::ZERO; frames * format.channels as usize]
                });
                chunks.push((stream.next_ts, stream.encoder.encode(&samples)));
                stream.frames_sent += frames as u64;
                stream.next_ts = stream.start_ts + stream.frames_sent * 1_000_000 / rate;
            }
        }

        for (timestamp, data) in chunks {
            let header = AudioChunk::header(timestamp);
            if let Err(e) = self.conn.send(Opcode::Binary, &[&header, &data]) {
                log::debug!("client {}: audio not sent: {}", self.conn.id(), e);
                break;
            }
        }
    }

    fn handle_text(&self, text: &str, received_us: u64) {
        let result = Message::parse(text).and_then(|message| {
            log::debug!("client {} <- {}", self.conn.id(), message.kind());
            self.handle_message(message, received_us)
        });
        if let Err(e) = result {
            log::warn!("client {}: {}", self.conn.id(), e);
            if e.ends_session() {
                self.close();
            }
        }
    }

    fn handle_message(&self, message: Message, received_us: u64) -> Result<()> {
        match message {
            Message::ClientHello(hello) => self.handle_hello(hello),
            Message::ClientState(state) => self.handle_state(state),
            Message::ClientTime(time) => self.handle_time(time, received_us),
            Message::StreamRequestFormat(request) => self.handle_request_format(request),
            Message::ClientGoodbye(goodbye) => self.handle_goodbye(goodbye),
            Message::ClientCommand(command) => {
                if let Some(command) = command.controller {
                    log::info!(
                        "client {}: controller command '{}'",
                        self.conn.id(),
                        command.command
                    );
                }
                Ok(())
            }
            Message::Unknown(kind) => {
                log::debug!("ignoring message type '{}'", kind);
                Ok(())
            }
            other => {
                log::debug!("unexpected '{}' from client", other.kind());
                Ok(())
            }
        }
    }

    fn handle_hello(&self, hello: ClientHello) -> Result<()> {
        if hello.version != PROTOCOL_VERSION {
            return Err(Error::NotSupported(format!(
                "protocol version {}",
                hello.version
            )));
        }

        let roles = Roles::from_names(&hello.supported_roles)
            .intersection(Roles::PLAYER.union(Roles::METADATA));
        let format = if roles.contains(Roles::PLAYER) {
            Some(select_format(&hello)?)
        } else {
            None
        };

        log::info!(
            "client {}: hello from '{}' ({}), roles {:?}",
            self.conn.id(),
            hello.name,
            hello.client_id,
            roles.names()
        );
        {
            let mut state = self.state.lock();
            state.client_id = Some(hello.client_id);
            state.name = Some(hello.name);
            state.roles = roles;
            state.format = format;
        }

        let config = &self.ctx.config;
        self.send_text(&builder::server_hello(&ServerHello {
            server_id: config.server_id.clone(),
            name: config.name.clone(),
            version: PROTOCOL_VERSION,
            active_roles: roles.names(),
            connection_reason: config.connection_reason,
        }));
        Ok(())
    }

    fn handle_state(&self, client_state: ClientState) -> Result<()> {
        let (roles, start) = {
            let mut state = self.state.lock();
            if let Some(player) = &client_state.player {
                state.volume = player.volume.or(state.volume);
                state.muted = player.muted.or(state.muted);
            }
            if state.client_id.is_none() {
                return Err(Error::Protocol("client/state before client/hello".into()));
            }
            let start = if state.roles.contains(Roles::PLAYER) && state.stream.is_none() {
                state.format
            } else {
                None
            };
            (state.roles, start)
        };

        if let Some(format) = start {
            self.start_stream(format)?;
        }

        let config = &self.ctx.config;
        self.send_text(&builder::group_update(&GroupUpdate {
            playback_state: Some(PlaybackState::Playing),
            group_id: Some(config.group_id.clone()),
            group_name: Some(config.group_name.clone()),
        }));
        if roles.contains(Roles::METADATA) {
            self.send_text(&builder::server_state(&ServerState {
                metadata: Some(MetadataState {
                    timestamp: self.ctx.clock.now_us(),
                    title: Some(config.name.clone()),
                    artist: None,
                    album: None,
                }),
            }));
        }
        Ok(())
    }

    fn start_stream(&self, format: AudioFormat) -> Result<()> {
        let encoder = create_encoder(format)?;
        let source = self.ctx.sources.create(&format);
        let at = self.ctx.clock.now_us() + self.ctx.config.delay_us();
        {
            let mut state = self.state.lock();
            state.format = Some(format);
            state.stream = Some(OutStream {
                source,
                encoder,
                start_ts: at,
                frames_sent: 0,
                next_ts: at,
            });
            state.playing = true;
        }
        log::info!(
            "client {}: streaming {} {} Hz {} ch {} bit",
            self.conn.id(),
            format.codec.as_str(),
            format.sample_rate,
            format.channels,
            format.bit_depth
        );
        self.send_text(&builder::stream_start(&StreamStart {
            player: Some(format.to_stream_config()),
        }));
        Ok(())
    }

    fn handle_time(&self, time: ClientTime, received_us: u64) -> Result<()> {
        let reply = ServerTime {
            client_transmitted: time.client_transmitted,
            server_received: received_us,
            server_transmitted: self.ctx.clock.now_us(),
        };
        self.send_text(&builder::server_time(&reply));
        Ok(())
    }

    fn handle_request_format(&self, request: StreamRequestFormat) -> Result<()> {
        let Some(request) = request.player else {
            return Ok(());
        };
        let current = self
            .state
            .lock()
            .format
            .ok_or_else(|| Error::Protocol("stream/request-format without a player stream".into()))?;

        let format = AudioFormat::parse(
            request.codec.as_deref().unwrap_or(current.codec.as_str()),
            request.sample_rate.unwrap_or(current.sample_rate),
            request.channels.unwrap_or(current.channels),
            Some(request.bit_depth.unwrap_or(current.bit_depth)),
        )?;
        if !can_encode(&format) {
            return Err(Error::NotSupported(format!(
                "requested {} {} bit",
                format.codec.as_str(),
                format.bit_depth
            )));
        }
        self.start_stream(format)
    }

    fn handle_goodbye(&self, goodbye: ClientGoodbye) -> Result<()> {
        log::info!("client {}: goodbye ({})", self.conn.id(), goodbye.reason);
        self.end_stream();
        Ok(())
    }
}

/// First offered format the sender can encode
fn select_format(hello: &ClientHello) -> Result<AudioFormat> {
    let support = hello
        .player_support
        .as_ref()
        .ok_or_else(|| Error::NotSupported("player role without player support".into()))?;
    support
        .supported_formats
        .iter()
        .filter_map(|spec| AudioFormat::from_spec(spec).ok())
        .find(can_encode)
        .ok_or_else(|| Error::NotSupported("no supported audio format offered".into()))
}

impl ConnectionEvents for ClientSession {
    fn message(&self, _conn: &Connection, opcode: Opcode, payload: &[u8]) {
        let received = self.ctx.clock.now_us();
        match opcode {
            Opcode::Text => match std::str::from_utf8(payload) {
                Ok(text) => self.handle_text(text, received),
                Err(_) => log::warn!("client {}: text frame is not UTF-8", self.conn.id()),
            },
            other => log::debug!("client {}: ignoring {:?} frame", self.conn.id(), other),
        }
    }

    fn error(&self, _conn: &Connection, err: &Error) {
        log::warn!("client {}: {}", self.conn.id(), err);
    }

    fn disconnected(&self, _conn: &Connection) {
        self.teardown();
    }
}
