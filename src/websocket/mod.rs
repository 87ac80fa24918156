use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod handlers;
pub mod message_types;

/// Unique identifier for a WebSocket connection.
///
/// Each connection gets a fresh id when it attaches, so cleanup on close is
/// precise even when one user holds several simultaneous sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
}

/// Identity and status bound to a connection once it has sent `user_login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub username: String,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

struct Connection {
    sender: UnboundedSender<String>,
    identity: Option<PresenceEntry>,
}

/// In-memory registry of live connections.
///
/// Attachment is two-phase: `connect` registers the outbound channel at the
/// transport level, `identify` binds the user identity when the client sends
/// its login event. Presence queries only consider identified connections.
/// Nothing here is persisted; a restart empties the registry and clients
/// re-identify on reconnect.
#[derive(Default, Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, Connection>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the transport channel for a new connection and hand back the
    /// receiving half for the session to pump into its socket.
    pub async fn connect(&self, connection_id: ConnectionId) -> UnboundedReceiver<String> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.write().await;
        guard.insert(
            connection_id,
            Connection {
                sender: tx,
                identity: None,
            },
        );
        tracing::debug!(connection = %connection_id, total = guard.len(), "connection attached");
        rx
    }

    /// Bind a user identity to a connection. Returns the resulting presence
    /// entry, or `None` when the connection is no longer registered.
    pub async fn identify(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        username: &str,
    ) -> Option<PresenceEntry> {
        let mut guard = self.inner.write().await;
        let connection = guard.get_mut(&connection_id)?;
        let entry = PresenceEntry {
            user_id,
            username: username.to_string(),
            status: PresenceStatus::Online,
            last_seen: Utc::now(),
        };
        connection.identity = Some(entry.clone());
        Some(entry)
    }

    /// Drop a connection. Returns its identity (if it ever identified) and
    /// whether that user now has no identified connection left, i.e. went
    /// fully offline.
    pub async fn disconnect(
        &self,
        connection_id: ConnectionId,
    ) -> Option<(PresenceEntry, bool)> {
        let mut guard = self.inner.write().await;
        let removed = guard.remove(&connection_id)?;
        let entry = removed.identity?;
        let last = !guard
            .values()
            .any(|c| c.identity.as_ref().is_some_and(|i| i.user_id == entry.user_id));
        Some((entry, last))
    }

    /// Update status and last-seen for an identified connection.
    pub async fn set_status(
        &self,
        connection_id: ConnectionId,
        status: PresenceStatus,
    ) -> Option<PresenceEntry> {
        let mut guard = self.inner.write().await;
        let identity = guard.get_mut(&connection_id)?.identity.as_mut()?;
        identity.status = status;
        identity.last_seen = Utc::now();
        Some(identity.clone())
    }

    /// Snapshot of everyone currently online, one entry per user.
    pub async fn online_users(&self) -> Vec<PresenceEntry> {
        let guard = self.inner.read().await;
        let mut by_user: HashMap<Uuid, PresenceEntry> = HashMap::new();
        for connection in guard.values() {
            if let Some(identity) = &connection.identity {
                by_user
                    .entry(identity.user_id)
                    .or_insert_with(|| identity.clone());
            }
        }
        by_user.into_values().collect()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard
            .values()
            .any(|c| c.identity.as_ref().is_some_and(|i| i.user_id == user_id))
    }

    /// Connection ids of every identified session a user currently holds.
    pub async fn user_connections(&self, user_id: Uuid) -> Vec<ConnectionId> {
        let guard = self.inner.read().await;
        guard
            .iter()
            .filter(|(_, c)| c.identity.as_ref().is_some_and(|i| i.user_id == user_id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Send a payload to one connection. Dead senders are pruned.
    pub async fn send_to_connection(&self, connection_id: ConnectionId, payload: &str) -> bool {
        let mut guard = self.inner.write().await;
        let sent = guard
            .get(&connection_id)
            .map(|c| c.sender.send(payload.to_string()).is_ok());
        match sent {
            Some(true) => true,
            Some(false) => {
                guard.remove(&connection_id);
                tracing::debug!(connection = %connection_id, "pruned dead sender");
                false
            }
            None => false,
        }
    }

    /// Deliver to every identified connection of a user. Returns how many
    /// connections received the payload; zero means the user is offline.
    pub async fn send_to_user(&self, user_id: Uuid, payload: &str) -> usize {
        let mut guard = self.inner.write().await;
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, connection) in guard.iter() {
            if connection.identity.as_ref().is_some_and(|i| i.user_id == user_id) {
                if connection.sender.send(payload.to_string()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            guard.remove(&id);
        }
        delivered
    }

    /// Broadcast to every identified connection, optionally excluding one
    /// (the originator of a presence event).
    pub async fn broadcast_to_identified(
        &self,
        payload: &str,
        except: Option<ConnectionId>,
    ) -> usize {
        let mut guard = self.inner.write().await;
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, connection) in guard.iter() {
            if Some(*id) == except || connection.identity.is_none() {
                continue;
            }
            if connection.sender.send(payload.to_string()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            guard.remove(&id);
        }
        delivered
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Tracks which connections have joined which conversation rooms.
///
/// Rooms are joined lazily the first time a participant sends within the
/// conversation during the connection's lifetime, and emptied when the
/// connection closes.
#[derive(Default, Clone)]
pub struct ConversationRooms {
    inner: Arc<RwLock<HashMap<String, HashSet<ConnectionId>>>>,
}

impl ConversationRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, conversation_id: &str, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        guard
            .entry(conversation_id.to_string())
            .or_default()
            .insert(connection_id);
    }

    pub async fn members(&self, conversation_id: &str) -> Vec<ConnectionId> {
        let guard = self.inner.read().await;
        guard
            .get(conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a connection from every room it joined. Empty rooms are
    /// dropped so the map does not grow without bound.
    pub async fn leave_all(&self, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        guard.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
    }
}
