use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use agora_types::events::ServerEvent;

/// Maps authenticated identities to their live connections. A user may hold
/// several connections at once (multiple tabs/devices); the registry is the
/// only shared mutable state between connection handlers, so every mutation
/// happens under one lock.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<Uuid, ConnectionEntry>,
    by_user: HashMap<i64, HashSet<Uuid>>,
}

struct ConnectionEntry {
    user_id: Option<i64>,
    viewing_room: Option<i64>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// What `unregister` removed, so the transport layer can run presence
/// teardown only when the identity's last connection is gone.
pub struct Unregistered {
    pub user_id: Option<i64>,
    pub was_last: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// Add a fresh, unauthenticated connection. Returns its id and the
    /// receiving end of its outbound event queue.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.connections.insert(
            conn_id,
            ConnectionEntry {
                user_id: None,
                viewing_room: None,
                tx,
            },
        );
        (conn_id, rx)
    }

    /// Bind an authenticated identity to a connection. Rebinding moves the
    /// connection between identities (latest auth wins). Returns false when
    /// the connection is already gone.
    pub async fn bind_identity(&self, conn_id: Uuid, user_id: i64) -> bool {
        let mut state = self.inner.write().await;
        let Some(entry) = state.connections.get_mut(&conn_id) else {
            return false;
        };
        let previous = entry.user_id.replace(user_id);
        if let Some(prev) = previous {
            detach_from_user(&mut state.by_user, prev, conn_id);
        }
        state.by_user.entry(user_id).or_default().insert(conn_id);
        true
    }

    /// Record which room the identity on this connection currently has open.
    /// Used only for suppression decisions, never for authorization.
    pub async fn set_viewing_room(&self, conn_id: Uuid, room_id: Option<i64>) {
        if let Some(entry) = self.inner.write().await.connections.get_mut(&conn_id) {
            entry.viewing_room = room_id;
        }
    }

    /// True when any of the user's live connections has this room open.
    pub async fn is_viewing(&self, user_id: i64, room_id: i64) -> bool {
        let state = self.inner.read().await;
        let Some(conns) = state.by_user.get(&user_id) else {
            return false;
        };
        conns.iter().any(|conn_id| {
            state
                .connections
                .get(conn_id)
                .is_some_and(|entry| entry.viewing_room == Some(room_id))
        })
    }

    /// Queue an event on one specific connection (auth replies).
    pub async fn send_to_conn(&self, conn_id: Uuid, event: ServerEvent) -> bool {
        let state = self.inner.read().await;
        match state.connections.get(&conn_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an event to every live connection bound to `user_id`.
    /// Connections whose queue is closed are pruned lazily.
    pub async fn send_to_user(&self, user_id: i64, event: &ServerEvent) {
        let dead = {
            let state = self.inner.read().await;
            let Some(conns) = state.by_user.get(&user_id) else {
                return;
            };
            conns
                .iter()
                .filter(|conn_id| {
                    state
                        .connections
                        .get(*conn_id)
                        .is_some_and(|entry| entry.tx.send(event.clone()).is_err())
                })
                .copied()
                .collect::<Vec<_>>()
        };
        self.prune(dead).await;
    }

    /// Deliver an event to every live authenticated connection, optionally
    /// skipping one (the originator).
    pub async fn broadcast(&self, event: &ServerEvent, excluding: Option<Uuid>) {
        let dead = {
            let state = self.inner.read().await;
            state
                .connections
                .iter()
                .filter(|(conn_id, entry)| {
                    entry.user_id.is_some()
                        && Some(**conn_id) != excluding
                        && entry.tx.send(event.clone()).is_err()
                })
                .map(|(conn_id, _)| *conn_id)
                .collect::<Vec<_>>()
        };
        self.prune(dead).await;
    }

    /// Remove a connection. The caller owns what removal means for presence;
    /// the registry only reports whether this was the identity's last one.
    pub async fn unregister(&self, conn_id: Uuid) -> Unregistered {
        let mut state = self.inner.write().await;
        let Some(entry) = state.connections.remove(&conn_id) else {
            return Unregistered {
                user_id: None,
                was_last: false,
            };
        };
        let was_last = match entry.user_id {
            Some(user_id) => detach_from_user(&mut state.by_user, user_id, conn_id),
            None => false,
        };
        Unregistered {
            user_id: entry.user_id,
            was_last,
        }
    }

    /// Live connection count for an identity (0 when offline everywhere).
    pub async fn connection_count(&self, user_id: i64) -> usize {
        self.inner
            .read()
            .await
            .by_user
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    async fn prune(&self, dead: Vec<Uuid>) {
        if dead.is_empty() {
            return;
        }
        let mut state = self.inner.write().await;
        for conn_id in dead {
            if let Some(entry) = state.connections.remove(&conn_id) {
                debug!("pruned closed connection {}", conn_id);
                if let Some(user_id) = entry.user_id {
                    detach_from_user(&mut state.by_user, user_id, conn_id);
                }
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `conn_id` from the user's connection set. Returns true when the
/// set became empty (the identity has no live connections left).
fn detach_from_user(by_user: &mut HashMap<i64, HashSet<Uuid>>, user_id: i64, conn_id: Uuid) -> bool {
    if let Some(conns) = by_user.get_mut(&user_id) {
        conns.remove(&conn_id);
        if conns.is_empty() {
            by_user.remove(&user_id);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::events::ServerEvent;

    #[tokio::test]
    async fn targeted_send_reaches_every_connection_of_the_user() {
        let registry = Registry::new();
        let (tab1, mut rx1) = registry.register().await;
        let (tab2, mut rx2) = registry.register().await;
        registry.bind_identity(tab1, 7).await;
        registry.bind_identity(tab2, 7).await;

        registry
            .send_to_user(
                7,
                &ServerEvent::PresenceChanged {
                    user_id: 3,
                    is_online: true,
                },
            )
            .await;

        assert!(matches!(
            rx1.recv().await,
            Some(ServerEvent::PresenceChanged { user_id: 3, .. })
        ));
        assert!(matches!(
            rx2.recv().await,
            Some(ServerEvent::PresenceChanged { user_id: 3, .. })
        ));
    }

    #[tokio::test]
    async fn broadcast_skips_unauthenticated_and_excluded_connections() {
        let registry = Registry::new();
        let (authed, mut authed_rx) = registry.register().await;
        let (_anon, mut anon_rx) = registry.register().await;
        let (excluded, mut excluded_rx) = registry.register().await;
        registry.bind_identity(authed, 1).await;
        registry.bind_identity(excluded, 2).await;

        registry
            .broadcast(
                &ServerEvent::PresenceChanged {
                    user_id: 1,
                    is_online: false,
                },
                Some(excluded),
            )
            .await;

        assert!(authed_rx.recv().await.is_some());
        assert!(anon_rx.try_recv().is_err());
        assert!(excluded_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn viewing_room_tracks_per_connection_state() {
        let registry = Registry::new();
        let (conn, _rx) = registry.register().await;
        registry.bind_identity(conn, 4).await;

        assert!(!registry.is_viewing(4, 9).await);

        registry.set_viewing_room(conn, Some(9)).await;
        assert!(registry.is_viewing(4, 9).await);
        assert!(!registry.is_viewing(4, 10).await);

        registry.set_viewing_room(conn, None).await;
        assert!(!registry.is_viewing(4, 9).await);
    }

    #[tokio::test]
    async fn unregister_reports_last_connection_per_identity() {
        let registry = Registry::new();
        let (tab1, _rx1) = registry.register().await;
        let (tab2, _rx2) = registry.register().await;
        registry.bind_identity(tab1, 5).await;
        registry.bind_identity(tab2, 5).await;

        let first = registry.unregister(tab1).await;
        assert_eq!(first.user_id, Some(5));
        assert!(!first.was_last);
        assert_eq!(registry.connection_count(5).await, 1);

        let second = registry.unregister(tab2).await;
        assert_eq!(second.user_id, Some(5));
        assert!(second.was_last);
        assert_eq!(registry.connection_count(5).await, 0);
    }

    #[tokio::test]
    async fn closed_connections_are_pruned_on_send() {
        let registry = Registry::new();
        let (dead, dead_rx) = registry.register().await;
        let (live, mut live_rx) = registry.register().await;
        registry.bind_identity(dead, 6).await;
        registry.bind_identity(live, 6).await;
        drop(dead_rx);

        registry
            .send_to_user(
                6,
                &ServerEvent::PresenceChanged {
                    user_id: 6,
                    is_online: true,
                },
            )
            .await;

        assert!(live_rx.recv().await.is_some());
        assert_eq!(registry.connection_count(6).await, 1);
    }

    #[tokio::test]
    async fn unauthenticated_unregister_reports_no_identity() {
        let registry = Registry::new();
        let (conn, _rx) = registry.register().await;

        let gone = registry.unregister(conn).await;
        assert_eq!(gone.user_id, None);
        assert!(!gone.was_last);
    }
}
