// ABOUTME: Sendspin sender
// ABOUTME: Accepts or initiates player connections and runs the audio engine

use crate::server::audio_engine::spawn_audio_engine;
use crate::server::audio_source::{SourceFactory, ToneFactory};
use crate::server::client::{ClientInfo, ClientSession, ServerContext};
use crate::server::client_manager::ClientManager;
use crate::server::config::ServerConfig;
use crate::sync::MonotonicClock;
use crate::ws::{Connection, WebSocket, WebSocketEvents};
use crate::Result;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long `stop` waits for stream/end to be written
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

struct EngineObserver {
    ctx: Weak<ServerContext>,
}

impl WebSocketEvents for EngineObserver {
    fn connected(&self, _user: Option<u64>, conn: &Connection, path: &str) {
        let Some(ctx) = self.ctx.upgrade() else {
            conn.destroy();
            return;
        };
        log::info!(
            "connection {} from {:?} on '{}'",
            conn.id(),
            conn.peer_addr(),
            path
        );
        let client = ClientSession::new(ctx.clone(), conn.clone());
        ctx.clients.add_client(client.clone());
        conn.add_observer(client);
    }
}

/// Sendspin server
pub struct SendspinServer {
    ctx: Arc<ServerContext>,
    ws: WebSocket,
    engine: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl SendspinServer {
    /// Create a new Sendspin server with default configuration
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a sender playing the configured test tone
    pub fn with_config(config: ServerConfig) -> Self {
        let sources = Arc::new(ToneFactory::new(config.frequency));
        Self::with_source(config, sources)
    }

    /// Create a sender with a custom audio source
    pub fn with_source(config: ServerConfig, sources: Arc<dyn SourceFactory>) -> Self {
        let ws = WebSocket::new(config.websocket.clone());
        let ctx = Arc::new(ServerContext {
            config,
            clock: MonotonicClock::new(),
            sources,
            clients: Arc::new(ClientManager::new()),
        });
        ws.add_observer(Arc::new(EngineObserver {
            ctx: Arc::downgrade(&ctx),
        }));
        Self {
            ctx,
            ws,
            engine: Mutex::new(None),
        }
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// Get the client manager
    pub fn client_manager(&self) -> Arc<ClientManager> {
        Arc::clone(&self.ctx.clients)
    }

    /// The clock audio timestamps are taken from
    pub fn clock(&self) -> MonotonicClock {
        self.ctx.clock
    }

    /// Reporting snapshots of the connected clients
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.ctx.clients.infos()
    }

    /// Start the audio engine, then listen or connect to the configured players
    ///
    /// Returns the bound address when listening. A player that cannot be
    /// resolved is logged and skipped.
    pub async fn start(&self) -> Result<Option<SocketAddr>> {
        let config = &self.ctx.config;
        {
            let mut engine = self.engine.lock();
            if engine.is_none() {
                *engine = Some(spawn_audio_engine(
                    self.ctx.clients.clone(),
                    self.ctx.clock,
                    config.chunk_interval_ms,
                ));
            }
        }

        if config.receivers.is_empty() {
            let host = config.bind_addr.ip().to_string();
            let addr = self
                .ws
                .listen(
                    None,
                    &host,
                    config.bind_addr.port(),
                    &[config.ws_path.clone()],
                )
                .await?;
            log::info!(
                "Sendspin server listening on {} (endpoint: {})",
                addr,
                config.ws_path
            );
            return Ok(Some(addr));
        }

        for host in &config.receivers {
            if let Err(e) = self
                .ws
                .connect(None, host, config.receiver_port, &config.ws_path)
                .await
            {
                log::warn!("cannot connect to {}:{}: {}", host, config.receiver_port, e);
            }
        }
        Ok(None)
    }

    /// Tell every player to drop buffered audio
    pub fn clear(&self) {
        self.ctx.clients.broadcast_stream_clear();
    }

    /// End every stream, close all connections and stop the audio engine
    pub async fn stop(&self) {
        let engine = self.engine.lock().take();
        if let Some((handle, shutdown)) = engine {
            let _ = shutdown.send(true);
            let _ = handle.await;
        }

        for client in self.ctx.clients.clients() {
            client.close();
        }
        let deadline = tokio::time::Instant::now() + STOP_DRAIN_TIMEOUT;
        while self.ws.connection_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.ws.shutdown();
        log::info!("Server shutdown complete");
    }
}

impl Default for SendspinServer {
    fn default() -> Self {
        Self::new()
    }
}
