// ABOUTME: Player that accepts or initiates sender connections
// ABOUTME: Creates a session per upgraded connection and enforces the single-server policy

use crate::audio::output::{ClockedOutputFactory, OutputFactory};
use crate::player::config::PlayerConfig;
use crate::player::session::{Session, SessionInfo};
use crate::protocol::messages::{goodbye, ConnectionReason};
use crate::sync::MonotonicClock;
use crate::ws::{Connection, WebSocket, WebSocketEvents};
use crate::Result;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// How long `stop` waits for goodbyes to be written
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) struct PlayerInner {
    config: PlayerConfig,
    ws: WebSocket,
    clock: MonotonicClock,
    output: Arc<dyn OutputFactory>,
    sessions: Mutex<Vec<Arc<Session>>>,
}

impl PlayerInner {
    pub(crate) fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub(crate) fn clock(&self) -> &MonotonicClock {
        &self.clock
    }

    pub(crate) fn output(&self) -> &Arc<dyn OutputFactory> {
        &self.output
    }

    pub(crate) fn remove_session(&self, id: u64) {
        self.sessions.lock().retain(|s| s.connection().id() != id);
    }

    /// Apply the single-server policy after `session` completed its hello
    ///
    /// Returns false when `session` itself was asked to leave.
    pub(crate) fn admit(&self, session: &Arc<Session>, reason: ConnectionReason) -> bool {
        if !self.config.single_server {
            return true;
        }
        let others: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .iter()
            .filter(|s| !Arc::ptr_eq(s, session) && !s.is_closed())
            .cloned()
            .collect();
        if others.is_empty() {
            return true;
        }

        match reason {
            ConnectionReason::Playback => {
                log::info!(
                    "session {} wants playback, dropping {} other session(s)",
                    session.connection().id(),
                    others.len()
                );
                for other in others {
                    other.goodbye(goodbye::ANOTHER_SERVER);
                }
                true
            }
            ConnectionReason::Discovery | ConnectionReason::Unknown => {
                log::info!(
                    "session {} is discovery only and another server is active",
                    session.connection().id()
                );
                session.goodbye(goodbye::ANOTHER_SERVER);
                false
            }
        }
    }
}

struct EngineObserver {
    player: Weak<PlayerInner>,
}

impl WebSocketEvents for EngineObserver {
    fn connected(&self, _user: Option<u64>, conn: &Connection, path: &str) {
        let Some(player) = self.player.upgrade() else {
            conn.destroy();
            return;
        };
        log::info!(
            "connection {} from {:?} on '{}'",
            conn.id(),
            conn.peer_addr(),
            path
        );

        let session = Session::new(self.player.clone(), conn.clone(), player.config.buffer_size);
        player.sessions.lock().push(session.clone());
        conn.add_observer(session.clone());
        if let Err(e) = session.send_client_hello() {
            log::warn!("client/hello not sent: {}", e);
            session.teardown();
        }
    }
}

/// A Sendspin player
///
/// Depending on the configuration the player either listens for senders or
/// connects to one. Audio is pulled by the output streams produced by its
/// [`OutputFactory`].
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    /// Create a player that discards its audio
    pub fn new(config: PlayerConfig) -> Self {
        Self::with_output(config, Arc::new(ClockedOutputFactory::discard()))
    }

    /// Create a player with a custom output
    pub fn with_output(config: PlayerConfig, output: Arc<dyn OutputFactory>) -> Self {
        let ws = WebSocket::new(config.websocket.clone());
        let inner = Arc::new(PlayerInner {
            config,
            ws,
            clock: MonotonicClock::new(),
            output,
            sessions: Mutex::new(Vec::new()),
        });
        inner.ws.add_observer(Arc::new(EngineObserver {
            player: Arc::downgrade(&inner),
        }));
        Self { inner }
    }

    /// The player's configuration
    pub fn config(&self) -> &PlayerConfig {
        &self.inner.config
    }

    /// The clock all timestamps are taken from
    pub fn clock(&self) -> MonotonicClock {
        self.inner.clock
    }

    /// Start listening, or connect to the configured sender
    ///
    /// Returns the bound address when listening.
    pub async fn start(&self) -> Result<Option<SocketAddr>> {
        let config = &self.inner.config;
        match &config.server {
            Some(host) => {
                self.inner
                    .ws
                    .connect(None, host, config.server_port, &config.path)
                    .await?;
                Ok(None)
            }
            None => {
                let host = config.listen_addr.ip().to_string();
                let addr = self
                    .inner
                    .ws
                    .listen(
                        None,
                        &host,
                        config.listen_addr.port(),
                        &[config.path.clone()],
                    )
                    .await?;
                Ok(Some(addr))
            }
        }
    }

    /// Snapshots of the live sessions
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.inner.sessions.lock().iter().map(|s| s.info()).collect()
    }

    /// Say goodbye to every sender and shut the transport down
    pub async fn stop(&self) {
        let sessions = self.inner.sessions.lock().clone();
        for session in sessions {
            session.goodbye(goodbye::SHUTDOWN);
        }

        let deadline = tokio::time::Instant::now() + STOP_DRAIN_TIMEOUT;
        while self.inner.ws.connection_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.inner.ws.shutdown();
        log::info!("player stopped");
    }
}
