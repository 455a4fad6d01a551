use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

use crate::llm::ChatEntry;

/// Opaque identity of one open connection
pub type ConnectionId = String;

/// Most recent conversation entries kept per connection
pub const HISTORY_LIMIT: usize = 20;

struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    username: String,
    history: Vec<ChatEntry>,
}

/// The shared table of currently open chat connections.
///
/// A connection is present iff it is open and registered. All access funnels
/// through one `RwLock`; critical sections stay short and never span an
/// inference call.
pub struct ChatRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    history_limit: usize,
}

impl ChatRegistry {
    pub fn new() -> Self {
        Self::with_history_limit(HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    pub fn new_id() -> ConnectionId {
        ulid::Ulid::new().to_string()
    }

    /// Add a connection with an empty history.
    ///
    /// Registering the same identity twice is a programming error and panics;
    /// identities are freshly generated ULIDs, so this cannot happen in
    /// normal operation.
    pub async fn register(
        &self,
        id: &ConnectionId,
        outbound: mpsc::UnboundedSender<String>,
        username: String,
    ) {
        let mut connections = self.connections.write().await;
        let previous = connections.insert(
            id.clone(),
            Connection {
                outbound,
                username,
                history: Vec::new(),
            },
        );
        assert!(previous.is_none(), "connection {} registered twice", id);
    }

    /// Idempotent removal; deregistering an absent connection is a no-op.
    ///
    /// Disconnect detection and explicit close can race, both call this.
    pub async fn deregister(&self, id: &ConnectionId) {
        self.connections.write().await.remove(id);
    }

    /// Deliver `payload` to every registered connection except `sender`.
    ///
    /// A closed outbound channel means the peer is mid-teardown; that
    /// delivery is skipped and the remaining peers still receive the payload.
    pub async fn broadcast(&self, sender: &ConnectionId, payload: &str) {
        let connections = self.connections.read().await;
        for (id, connection) in connections.iter() {
            if id == sender {
                continue;
            }
            let _ = connection.outbound.send(payload.to_string());
        }
    }

    /// Append an entry, trimming oldest-first to the history bound in the
    /// same critical section.
    pub async fn append_history(&self, id: &ConnectionId, entry: ChatEntry) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(id) {
            connection.history.push(entry);
            if connection.history.len() > self.history_limit {
                let excess = connection.history.len() - self.history_limit;
                connection.history.drain(..excess);
            }
        }
    }

    /// Snapshot of a connection's history; empty if the connection is gone.
    pub async fn history(&self, id: &ConnectionId) -> Vec<ChatEntry> {
        self.connections
            .read()
            .await
            .get(id)
            .map(|c| c.history.clone())
            .unwrap_or_default()
    }

    pub async fn set_username(&self, id: &ConnectionId, username: String) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(id) {
            connection.username = username;
        }
    }

    pub async fn username(&self, id: &ConnectionId) -> Option<String> {
        self.connections
            .read()
            .await
            .get(id)
            .map(|c| c.username.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ChatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
