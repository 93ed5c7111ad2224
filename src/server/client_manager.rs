// ABOUTME: Registry of connected client sessions
// ABOUTME: Lookup, broadcast and per-client commands for the sender

use crate::protocol::builder;
use crate::protocol::messages::{PlayerCommand, ServerCommand, StreamClear, StreamEnd};
use crate::server::client::{ClientInfo, ClientSession};
use parking_lot::RwLock;
use std::sync::Arc;

/// Manages all connected clients
#[derive(Default)]
pub struct ClientManager {
    clients: RwLock<Vec<Arc<ClientSession>>>,
}

impl ClientManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client
    pub fn add_client(&self, client: Arc<ClientSession>) {
        let mut clients = self.clients.write();
        clients.push(client);
        log::info!("client added, total clients: {}", clients.len());
    }

    /// Remove a client by connection id
    pub fn remove_client(&self, id: u64) -> Option<Arc<ClientSession>> {
        let mut clients = self.clients.write();
        let pos = clients.iter().position(|c| c.connection().id() == id)?;
        let client = clients.remove(pos);
        log::info!("client {} removed, total clients: {}", id, clients.len());
        Some(client)
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Snapshot of the current clients
    pub fn clients(&self) -> Vec<Arc<ClientSession>> {
        self.clients.read().clone()
    }

    /// Client whose hello carried `client_id`
    pub fn find(&self, client_id: &str) -> Option<Arc<ClientSession>> {
        self.clients
            .read()
            .iter()
            .find(|c| c.client_id().as_deref() == Some(client_id))
            .cloned()
    }

    /// Reporting snapshots
    pub fn infos(&self) -> Vec<ClientInfo> {
        self.clients.read().iter().map(|c| c.info()).collect()
    }

    /// Send stream/clear to every player
    pub fn broadcast_stream_clear(&self) {
        let text = builder::stream_clear(&StreamClear {
            roles: Some(vec!["player".to_string()]),
        });
        let players = self.players();
        for client in &players {
            client.clear_stream();
            client.send_text(&text);
        }
        log::debug!("broadcast stream/clear to {} player clients", players.len());
    }

    /// Send stream/end to every player
    pub fn broadcast_stream_end(&self) {
        let text = builder::stream_end(&StreamEnd {
            roles: Some(vec!["player".to_string()]),
        });
        let players = self.players();
        for client in &players {
            client.end_stream();
            client.send_text(&text);
        }
        log::debug!("broadcast stream/end to {} player clients", players.len());
    }

    /// Send a server/command to one client
    ///
    /// Returns false when no such client is connected.
    pub fn send_player_command(
        &self,
        client_id: &str,
        command: &str,
        volume: Option<u8>,
        mute: Option<bool>,
    ) -> bool {
        let Some(client) = self.find(client_id) else {
            return false;
        };
        client.send_text(&builder::server_command(&ServerCommand {
            player: Some(PlayerCommand {
                command: command.to_string(),
                volume,
                mute,
            }),
        }));
        true
    }

    fn players(&self) -> Vec<Arc<ClientSession>> {
        self.clients
            .read()
            .iter()
            .filter(|c| c.is_player())
            .cloned()
            .collect()
    }
}
