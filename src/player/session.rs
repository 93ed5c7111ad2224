// ABOUTME: One player-side session with a sender
// ABOUTME: Hello exchange, time-sync back-off, stream lifecycle and audio intake

use crate::audio::output::OutputStream;
use crate::audio::playout::{Playout, SharedPlayout};
use crate::audio::types::AudioFormat;
use crate::error::Error;
use crate::player::player::PlayerInner;
use crate::protocol::builder;
use crate::protocol::messages::{
    goodbye, ClientGoodbye, ClientHello, ClientState, ClientTime, ConnectionReason, DeviceInfo,
    Message, PlayerState, PlayerSupport, PlayerSyncState, Roles, ServerCommand, ServerHello,
    ServerTime, StreamStart, PROTOCOL_VERSION,
};
use crate::protocol::AudioChunk;
use crate::ws::{Connection, ConnectionEvents, Opcode};
use crate::Result;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Delay before the next client/time, given how many exchanges completed
pub fn time_sync_interval(completed: u32) -> Duration {
    match completed {
        0..=3 => Duration::from_millis(200),
        4..=9 => Duration::from_secs(1),
        10..=19 => Duration::from_secs(2),
        _ => Duration::from_secs(5),
    }
}

/// Snapshot of a session for reporting
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Connection id
    pub id: u64,
    /// Sender id from server/hello
    pub server_id: Option<String>,
    /// Sender name from server/hello
    pub server_name: Option<String>,
    /// Roles the sender activated
    pub active_roles: Roles,
    /// Why the sender connected
    pub reason: ConnectionReason,
    /// Format of the running stream
    pub format: Option<AudioFormat>,
    /// Completed time exchanges
    pub time_exchanges: u32,
    /// Current output rate
    pub rate: f64,
}

struct SessionState {
    server_id: Option<String>,
    server_name: Option<String>,
    active_roles: Roles,
    reason: ConnectionReason,
    timer: Option<AbortHandle>,
    output: Option<Box<dyn OutputStream>>,
    volume: u8,
    muted: bool,
    closed: bool,
}

/// Player side of one connection
pub struct Session {
    player: Weak<PlayerInner>,
    conn: Connection,
    playout: SharedPlayout,
    state: Mutex<SessionState>,
    this: Weak<Session>,
}

impl Session {
    pub(crate) fn new(player: Weak<PlayerInner>, conn: Connection, buffer_size: usize) -> Arc<Self> {
        Arc::new_cyclic(|this| Session {
            player,
            conn,
            playout: Playout::shared(buffer_size),
            state: Mutex::new(SessionState {
                server_id: None,
                server_name: None,
                active_roles: Roles::NONE,
                reason: ConnectionReason::Discovery,
                timer: None,
                output: None,
                volume: 100,
                muted: false,
                closed: false,
            }),
            this: this.clone(),
        })
    }

    /// The underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The session's playout
    pub fn playout(&self) -> SharedPlayout {
        self.playout.clone()
    }

    /// Whether the session is still live
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Reporting snapshot
    pub fn info(&self) -> SessionInfo {
        let (time_exchanges, rate, format) = {
            let playout = self.playout.lock();
            (playout.time_exchanges(), playout.rate(), playout.format())
        };
        let state = self.state.lock();
        SessionInfo {
            id: self.conn.id(),
            server_id: state.server_id.clone(),
            server_name: state.server_name.clone(),
            active_roles: state.active_roles,
            reason: state.reason,
            format,
            time_exchanges,
            rate,
        }
    }

    fn send(&self, text: String) -> Result<()> {
        log::debug!("session {} -> {}", self.conn.id(), text);
        self.conn.send_text(&text)
    }

    pub(crate) fn send_client_hello(&self) -> Result<()> {
        let player = self
            .player
            .upgrade()
            .ok_or_else(|| Error::Connection("player is gone".into()))?;
        let config = player.config();

        let hello = ClientHello {
            client_id: config.client_id.clone(),
            name: config.name.clone(),
            version: PROTOCOL_VERSION,
            supported_roles: Roles::PLAYER.union(Roles::METADATA).names(),
            device_info: Some(DeviceInfo {
                product_name: Some(config.product_name.clone()),
                manufacturer: None,
                software_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            player_support: Some(PlayerSupport {
                supported_formats: config.supported_formats.iter().map(|f| f.to_spec()).collect(),
                buffer_capacity: config.buffer_capacity,
                supported_commands: config.supported_commands.clone(),
            }),
        };
        self.send(builder::client_hello(&hello))
    }

    fn send_client_state(&self) -> Result<()> {
        let (volume, muted) = {
            let state = self.state.lock();
            (state.volume, state.muted)
        };
        self.send(builder::client_state(&ClientState {
            player: Some(PlayerState {
                state: Some(PlayerSyncState::Synchronized),
                volume: Some(volume),
                muted: Some(muted),
            }),
        }))
    }

    fn send_client_time(&self) -> Result<()> {
        let Some(player) = self.player.upgrade() else {
            return Ok(());
        };
        let now = player.clock().now_us();
        self.send(builder::client_time(&ClientTime {
            client_transmitted: now,
        }))
    }

    /// Tell the sender we are leaving and close once that is written
    pub fn goodbye(&self, reason: &str) {
        log::info!("session {}: goodbye ({})", self.conn.id(), reason);
        let _ = self.send(builder::client_goodbye(&ClientGoodbye {
            reason: reason.to_string(),
        }));
        self.conn.disconnect(true);
    }

    fn schedule_time_sync(&self, delay: Duration) {
        let this = self.this.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = this.upgrade() {
                if let Err(e) = session.send_client_time() {
                    log::debug!("client/time not sent: {}", e);
                }
            }
        });
        let mut state = self.state.lock();
        if state.closed {
            task.abort();
            return;
        }
        if let Some(old) = state.timer.replace(task.abort_handle()) {
            old.abort();
        }
    }

    /// Stop timers, close the local stream and forget the session
    pub(crate) fn teardown(&self) {
        let output = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.output.take()
        };
        drop(output);
        self.playout.lock().end();

        if let Some(player) = self.player.upgrade() {
            player.remove_session(self.conn.id());
        }
        log::info!("session {} closed", self.conn.id());
        self.conn.destroy();
    }

    fn handle_text(&self, text: &str) {
        let result = Message::parse(text).and_then(|message| {
            log::debug!("session {} <- {}", self.conn.id(), message.kind());
            self.handle_message(message)
        });
        if let Err(e) = result {
            log::warn!("session {}: {}", self.conn.id(), e);
            if e.ends_session() {
                self.goodbye(goodbye::SHUTDOWN);
            }
        }
    }

    fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            Message::ServerHello(hello) => self.handle_server_hello(hello),
            Message::ServerTime(time) => self.handle_server_time(time),
            Message::StreamStart(start) => self.handle_stream_start(start),
            Message::StreamClear(_) => {
                self.playout.lock().clear();
                Ok(())
            }
            Message::StreamEnd(_) => self.handle_stream_end(),
            Message::ServerCommand(command) => self.handle_server_command(command),
            Message::ServerState(state) => {
                if let Some(metadata) = state.metadata {
                    log::debug!(
                        "metadata at {}: {:?} - {:?}",
                        metadata.timestamp,
                        metadata.artist,
                        metadata.title
                    );
                }
                Ok(())
            }
            Message::GroupUpdate(update) => {
                log::info!(
                    "group {:?} ({:?}): {:?}",
                    update.group_name,
                    update.group_id,
                    update.playback_state
                );
                Ok(())
            }
            Message::Unknown(kind) => {
                log::debug!("ignoring message type '{}'", kind);
                Ok(())
            }
            other => {
                log::debug!("unexpected '{}' from sender", other.kind());
                Ok(())
            }
        }
    }

    fn handle_server_hello(&self, hello: ServerHello) -> Result<()> {
        if hello.version != PROTOCOL_VERSION {
            return Err(Error::NotSupported(format!(
                "protocol version {}",
                hello.version
            )));
        }
        let roles = Roles::from_names(&hello.active_roles);
        let reason = match hello.connection_reason {
            ConnectionReason::Unknown => ConnectionReason::Discovery,
            known => known,
        };
        log::info!(
            "session {}: server '{}' ({}), roles {:?}, reason {}",
            self.conn.id(),
            hello.name,
            hello.server_id,
            roles.names(),
            reason.as_str()
        );
        {
            let mut state = self.state.lock();
            state.server_id = Some(hello.server_id);
            state.server_name = Some(hello.name);
            state.active_roles = roles;
            state.reason = reason;
        }

        if let (Some(player), Some(this)) = (self.player.upgrade(), self.this.upgrade()) {
            if !player.admit(&this, reason) {
                return Ok(());
            }
        }
        self.send_client_state()
    }

    fn handle_server_time(&self, time: ServerTime) -> Result<()> {
        let Some(player) = self.player.upgrade() else {
            return Ok(());
        };
        let t4 = player.clock().now_us();
        let completed = {
            let mut playout = self.playout.lock();
            let completed = playout.time_exchanges();
            playout.record_time_exchange(
                time.client_transmitted,
                time.server_received,
                time.server_transmitted,
                t4,
            );
            completed
        };
        log::trace!(
            "time exchange {}: rtt {} us",
            completed + 1,
            (t4.saturating_sub(time.client_transmitted))
                .saturating_sub(time.server_transmitted.saturating_sub(time.server_received))
        );
        self.schedule_time_sync(time_sync_interval(completed));
        Ok(())
    }

    fn handle_stream_start(&self, start: StreamStart) -> Result<()> {
        let config = start
            .player
            .ok_or_else(|| Error::InvalidMessage("stream/start without player".into()))?;
        let format = AudioFormat::from_stream_config(&config)?;
        let player = self
            .player
            .upgrade()
            .ok_or_else(|| Error::Connection("player is gone".into()))?;

        let running = {
            let state = self.state.lock();
            state.output.as_ref().map(|o| o.format())
        };
        if running == Some(format) {
            log::info!("session {}: stream restarted", self.conn.id());
            self.playout.lock().clear();
            return Ok(());
        }

        // Replacing the output joins its thread, so do it without our lock
        let old = self.state.lock().output.take();
        drop(old);

        self.playout.lock().set_format(format);
        let output = player
            .output()
            .create(format, self.playout.clone(), *player.clock())?;
        log::info!(
            "session {}: stream/start {} {} Hz {} ch {} bit",
            self.conn.id(),
            format.codec.as_str(),
            format.sample_rate,
            format.channels,
            format.bit_depth
        );
        self.state.lock().output = Some(output);
        self.schedule_time_sync(Duration::ZERO);
        Ok(())
    }

    fn handle_stream_end(&self) -> Result<()> {
        let output = self.state.lock().output.take();
        drop(output);
        self.playout.lock().end();
        log::info!("session {}: stream/end", self.conn.id());
        Ok(())
    }

    fn handle_server_command(&self, command: ServerCommand) -> Result<()> {
        let Some(command) = command.player else {
            return Ok(());
        };
        {
            let mut state = self.state.lock();
            match command.command.as_str() {
                "volume" => {
                    let volume = command
                        .volume
                        .ok_or_else(|| Error::InvalidMessage("volume command without volume".into()))?;
                    state.volume = volume.min(100);
                }
                "mute" => {
                    let mute = command
                        .mute
                        .ok_or_else(|| Error::InvalidMessage("mute command without mute".into()))?;
                    state.muted = mute;
                }
                other => {
                    log::debug!("ignoring player command '{}'", other);
                    return Ok(());
                }
            }
        }
        self.send_client_state()
    }

    fn handle_binary(&self, payload: &[u8]) {
        match AudioChunk::parse(payload) {
            Ok(Some(chunk)) => {
                if self.state.lock().output.is_none() {
                    return;
                }
                self.playout.lock().write_chunk(chunk.timestamp_us, chunk.data);
            }
            Ok(None) => {}
            Err(e) => log::debug!("session {}: {}", self.conn.id(), e),
        }
    }
}

impl ConnectionEvents for Session {
    fn message(&self, _conn: &Connection, opcode: Opcode, payload: &[u8]) {
        match opcode {
            Opcode::Text => match std::str::from_utf8(payload) {
                Ok(text) => self.handle_text(text),
                Err(_) => log::warn!("session {}: text frame is not UTF-8", self.conn.id()),
            },
            Opcode::Binary => self.handle_binary(payload),
            other => log::debug!("session {}: ignoring {:?} frame", self.conn.id(), other),
        }
    }

    fn error(&self, _conn: &Connection, err: &Error) {
        log::warn!("session {}: {}", self.conn.id(), err);
    }

    fn disconnected(&self, _conn: &Connection) {
        self.teardown();
    }
}
