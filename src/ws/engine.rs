// ABOUTME: WebSocket engine: listening servers, outgoing connects and cancellation
// ABOUTME: Announces upgraded connections to registered observers

use crate::error::Error;
use crate::ws::connection::{Connection, Driver, Owner, Role};
use crate::ws::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::ws::handshake::{accept_key, build_request, generate_key};
use crate::Result;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::AbortHandle;

/// Live connections allowed per listening server
pub const MAX_CONNECTIONS: usize = 64;

/// Engine settings
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// `User-Agent` sent with upgrade requests
    pub user_agent: String,
    /// `Server` header sent with upgrade replies
    pub server_name: String,
    /// Live connections allowed per listening server
    pub max_connections: usize,
    /// Largest accepted frame payload in bytes
    pub max_frame_size: u64,
}

impl WebSocketConfig {
    /// Set the user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the server name
    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the per-server connection limit
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the frame payload limit
    pub fn max_frame_size(mut self, max: u64) -> Self {
        self.max_frame_size = max;
        self
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        let ident = format!("Sendspin-RS/{}", env!("CARGO_PKG_VERSION"));
        Self {
            user_agent: ident.clone(),
            server_name: ident,
            max_connections: MAX_CONNECTIONS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Engine-level events
pub trait WebSocketEvents: Send + Sync {
    /// A connection finished its upgrade
    ///
    /// `user` is the tag passed to `listen` or `connect`, `path` the upgrade
    /// path. Observers usually attach their own [`ConnectionEvents`] here.
    ///
    /// [`ConnectionEvents`]: crate::ws::ConnectionEvents
    fn connected(&self, user: Option<u64>, conn: &Connection, path: &str);
}

pub(crate) struct ServerInner {
    user: Option<u64>,
    local_addr: SocketAddr,
    paths: Arc<[String]>,
    connections: Mutex<Vec<Connection>>,
    accept_task: Mutex<Option<AbortHandle>>,
}

impl ServerInner {
    pub(crate) fn remove_connection(&self, id: u64) {
        self.connections.lock().retain(|c| c.id() != id);
    }

    fn shutdown(&self) -> usize {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        let connections = std::mem::take(&mut *self.connections.lock());
        for conn in &connections {
            conn.destroy();
        }
        log::info!("stopped listening on {}", self.local_addr);
        connections.len()
    }
}

pub(crate) struct EngineInner {
    config: Arc<WebSocketConfig>,
    observers: Mutex<Vec<Arc<dyn WebSocketEvents>>>,
    servers: Mutex<Vec<Arc<ServerInner>>>,
    connections: Mutex<Vec<Connection>>,
    next_id: AtomicU64,
}

impl EngineInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn remove_connection(&self, id: u64) {
        self.connections.lock().retain(|c| c.id() != id);
    }

    pub(crate) fn emit_connected(&self, user: Option<u64>, conn: &Connection, path: &str) {
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.connected(user, conn, path);
        }
    }
}

/// The WebSocket engine
///
/// Owns listening servers and the connections it initiated. All work runs
/// as tasks on the ambient tokio runtime.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<EngineInner>,
}

impl WebSocket {
    /// Create an engine
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config: Arc::new(config),
                observers: Mutex::new(Vec::new()),
                servers: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Engine settings
    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    /// Subscribe to engine events
    pub fn add_observer(&self, observer: Arc<dyn WebSocketEvents>) {
        self.inner.observers.lock().push(observer);
    }

    /// Number of live connections, accepted and initiated
    pub fn connection_count(&self) -> usize {
        let initiated = self.inner.connections.lock().len();
        let accepted: usize = self
            .inner
            .servers
            .lock()
            .iter()
            .map(|s| s.connections.lock().len())
            .sum();
        initiated + accepted
    }

    /// Listen on `host:port`, upgrading requests for one of `paths`
    ///
    /// An empty `paths` accepts any path. Returns the bound address, which
    /// is useful with port 0.
    pub async fn listen(
        &self,
        user: Option<u64>,
        host: &str,
        port: u16,
        paths: &[String],
    ) -> Result<SocketAddr> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(ServerInner {
            user,
            local_addr,
            paths: paths.to_vec().into(),
            connections: Mutex::new(Vec::new()),
            accept_task: Mutex::new(None),
        });

        let task = tokio::spawn(accept_loop(
            Arc::downgrade(&self.inner),
            Arc::downgrade(&server),
            listener,
        ));
        *server.accept_task.lock() = Some(task.abort_handle());
        self.inner.servers.lock().push(server);

        log::info!("listening on {} for {:?}", local_addr, paths);
        Ok(local_addr)
    }

    /// Connect to `host:port` and upgrade on `path`
    ///
    /// Name resolution happens here; the TCP connect and handshake continue
    /// in the background. Failures after this returns are reported through
    /// the connection's `error` and `disconnected` events, success through
    /// [`WebSocketEvents::connected`].
    pub async fn connect(
        &self,
        user: Option<u64>,
        host: &str,
        port: u16,
        path: &str,
    ) -> Result<Connection> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
        if addrs.is_empty() {
            return Err(Error::Connection(format!("no address for {}:{}", host, port)));
        }

        let conn = Connection::new(
            self.inner.next_id(),
            Role::Initiator,
            user,
            self.inner.config.clone(),
            Owner::Engine(Arc::downgrade(&self.inner)),
            Arc::downgrade(&self.inner),
            None,
        );
        self.inner.connections.lock().push(conn.clone());

        let key = generate_key();
        let expected = accept_key(&key);
        let request = build_request(host, port, path, &key, &self.inner.config.user_agent);
        let upgrade_path = path.to_string();
        conn.queue(
            request.into_bytes(),
            Some(Box::new(move |conn, reply| {
                if reply.status != 101 {
                    return Err(Error::Protocol(format!(
                        "upgrade refused: {} {}",
                        reply.status, reply.reason
                    )));
                }
                conn.complete_upgrade(&upgrade_path);
                Ok(())
            })),
        )?;

        log::info!("connecting to {}:{}{}", host, port, path);
        let task_conn = conn.clone();
        tokio::spawn(async move {
            let stream = match connect_first(&addrs).await {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("connect failed: {}", err);
                    task_conn.emit_error(&err);
                    task_conn.disconnect(false);
                    return;
                }
            };
            if let Ok(peer) = stream.peer_addr() {
                task_conn.set_peer(peer);
            }
            if let Err(e) = stream.set_nodelay(true) {
                log::debug!("TCP_NODELAY: {}", e);
            }
            Driver::initiator(task_conn, expected).run(stream).await;
        });

        Ok(conn)
    }

    /// Destroy every server and initiated connection tagged with `user`
    ///
    /// Returns how many servers and connections were destroyed.
    pub fn cancel(&self, user: Option<u64>) -> usize {
        let servers: Vec<_> = {
            let mut servers = self.inner.servers.lock();
            let (matched, kept) = std::mem::take(&mut *servers)
                .into_iter()
                .partition(|s| s.user == user);
            *servers = kept;
            matched
        };
        let connections: Vec<_> = self
            .inner
            .connections
            .lock()
            .iter()
            .filter(|c| c.user() == user)
            .cloned()
            .collect();

        let mut count = 0;
        for server in servers {
            server.shutdown();
            count += 1;
        }
        for conn in connections {
            conn.destroy();
            count += 1;
        }
        count
    }

    /// Destroy all servers and connections
    pub fn shutdown(&self) {
        let servers = std::mem::take(&mut *self.inner.servers.lock());
        for server in servers {
            server.shutdown();
        }
        let connections = self.inner.connections.lock().clone();
        for conn in connections {
            conn.destroy();
        }
    }
}

async fn connect_first(addrs: &[SocketAddr]) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        Some(e) => e.into(),
        None => Error::Connection("no address to connect to".into()),
    })
}

async fn accept_loop(engine: Weak<EngineInner>, server: Weak<ServerInner>, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("accept failed: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                continue;
            }
        };

        let (Some(engine_ref), Some(server_ref)) = (engine.upgrade(), server.upgrade()) else {
            return;
        };

        if server_ref.connections.lock().len() >= engine_ref.config.max_connections {
            log::warn!(
                "refusing {} on {}: {} connections already",
                peer,
                server_ref.local_addr,
                engine_ref.config.max_connections
            );
            continue;
        }
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("TCP_NODELAY on {}: {}", peer, e);
        }

        let conn = Connection::new(
            engine_ref.next_id(),
            Role::Acceptor,
            server_ref.user,
            engine_ref.config.clone(),
            Owner::Server(server.clone()),
            engine.clone(),
            Some(peer),
        );
        server_ref.connections.lock().push(conn.clone());
        log::debug!("accepted {} as connection {}", peer, conn.id());

        tokio::spawn(Driver::acceptor(conn, server_ref.paths.clone()).run(stream));
    }
}
