use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use ember_types::events::RelayEvent;
use ember_types::models::UserSummary;

pub type ConnectionId = Uuid;

struct Peer {
    user: UserSummary,
    tx: mpsc::UnboundedSender<RelayEvent>,
}

/// Which connection sits in which session room, and how to reach it.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// conn_id -> user + outbound channel
    connections: RwLock<HashMap<ConnectionId, Peer>>,

    /// session_id -> joined connections
    sessions: RwLock<HashMap<Uuid, HashSet<ConnectionId>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns its id and the receiver its send loop drains.
    pub async fn register(&self, user: UserSummary) -> (ConnectionId, mpsc::UnboundedReceiver<RelayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(conn_id, Peer { user, tx });
        (conn_id, rx)
    }

    /// Drop the connection from every room. Returns the sessions it was in
    /// and the user it belonged to.
    pub async fn unregister(&self, conn_id: ConnectionId) -> (Option<UserSummary>, Vec<Uuid>) {
        let peer = self.inner.connections.write().await.remove(&conn_id);

        let mut left = Vec::new();
        let mut sessions = self.inner.sessions.write().await;
        sessions.retain(|session_id, members| {
            if members.remove(&conn_id) {
                left.push(*session_id);
            }
            !members.is_empty()
        });

        (peer.map(|p| p.user), left)
    }

    pub async fn send_to(&self, conn_id: ConnectionId, event: RelayEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(peer) = connections.get(&conn_id) {
            let _ = peer.tx.send(event);
        }
    }

    /// Returns false when the connection was already in the room.
    pub async fn join(&self, session_id: Uuid, conn_id: ConnectionId) -> bool {
        self.inner
            .sessions
            .write()
            .await
            .entry(session_id)
            .or_default()
            .insert(conn_id)
    }

    pub async fn leave(&self, session_id: Uuid, conn_id: ConnectionId) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        let Some(members) = sessions.get_mut(&session_id) else {
            return false;
        };
        let removed = members.remove(&conn_id);
        if members.is_empty() {
            sessions.remove(&session_id);
        }
        removed
    }

    pub async fn is_member(&self, session_id: Uuid, conn_id: ConnectionId) -> bool {
        self.inner
            .sessions
            .read()
            .await
            .get(&session_id)
            .is_some_and(|members| members.contains(&conn_id))
    }

    pub async fn member_count(&self, session_id: Uuid) -> usize {
        self.inner
            .sessions
            .read()
            .await
            .get(&session_id)
            .map_or(0, HashSet::len)
    }

    /// Send to every connection in the room except `exclude`.
    pub async fn broadcast(&self, session_id: Uuid, event: RelayEvent, exclude: Option<ConnectionId>) {
        let sessions = self.inner.sessions.read().await;
        let Some(members) = sessions.get(&session_id) else {
            return;
        };

        let connections = self.inner.connections.read().await;
        for conn_id in members {
            if Some(*conn_id) == exclude {
                continue;
            }
            if let Some(peer) = connections.get(conn_id) {
                let _ = peer.tx.send(event.clone());
            }
        }
    }
}
