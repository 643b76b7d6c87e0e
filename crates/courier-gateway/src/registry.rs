use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use courier_types::UserId;
use courier_types::frames::ServerFrame;

/// Key under which a live socket is registered.
///
/// Chat sockets register per directed pair, so two users chatting hold one
/// entry per direction. Notification sockets register per recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKey {
    Recipient(UserId),
    Pair { owner: UserId, opponent: UserId },
}

impl ConnectionKey {
    /// The opposite direction of a chat pair.
    pub fn reciprocal(self) -> Option<Self> {
        match self {
            Self::Pair { owner, opponent } => Some(Self::Pair {
                owner: opponent,
                opponent: owner,
            }),
            Self::Recipient(_) => None,
        }
    }
}

struct Connection {
    conn_id: Uuid,
    is_valid: bool,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

/// Registered/validated flags for one key, read under a single lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyState {
    pub registered: bool,
    pub valid: bool,
}

/// Snapshot of both ends of a chat pair, read under a single lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairPresence {
    pub sender: KeyState,
    pub opponent_online: bool,
}

/// Process-wide map of live sockets. At most one connection holds a key at
/// a time, and a validated holder cannot be displaced.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<ConnectionKey, Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a socket under `key` and hands back its identity plus the
    /// frame receiver its writer drains. Returns `None` when a validated
    /// connection already holds the key; an unvalidated holder is displaced.
    pub async fn register(
        &self,
        key: ConnectionKey,
    ) -> Option<(Uuid, mpsc::UnboundedReceiver<ServerFrame>)> {
        let mut map = self.inner.write().await;
        if let Some(existing) = map.get(&key) {
            if existing.is_valid {
                return None;
            }
        }
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        map.insert(
            key,
            Connection {
                conn_id,
                is_valid: false,
                tx,
            },
        );
        Some((conn_id, rx))
    }

    /// Marks the current holder of `key` as validated.
    pub async fn validate(&self, key: ConnectionKey) -> bool {
        let mut map = self.inner.write().await;
        match map.get_mut(&key) {
            Some(conn) => {
                conn.is_valid = true;
                true
            }
            None => false,
        }
    }

    /// Whether `conn_id` still holds `key`. A displaced socket uses this to
    /// stop reading without touching the newer holder's entry.
    pub async fn owns(&self, key: ConnectionKey, conn_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .get(&key)
            .is_some_and(|conn| conn.conn_id == conn_id)
    }

    /// Removes `key`, but only if `conn_id` still holds it.
    pub async fn remove(&self, key: ConnectionKey, conn_id: Uuid) -> bool {
        let mut map = self.inner.write().await;
        if map.get(&key).is_some_and(|conn| conn.conn_id == conn_id) {
            map.remove(&key);
            return true;
        }
        false
    }

    pub async fn key_state(&self, key: ConnectionKey) -> KeyState {
        match self.inner.read().await.get(&key) {
            Some(conn) => KeyState {
                registered: true,
                valid: conn.is_valid,
            },
            None => KeyState::default(),
        }
    }

    /// Online means present and validated.
    pub async fn is_online(&self, key: ConnectionKey) -> bool {
        self.inner
            .read()
            .await
            .get(&key)
            .is_some_and(|conn| conn.is_valid)
    }

    pub async fn pair_presence(&self, owner: UserId, opponent: UserId) -> PairPresence {
        let map = self.inner.read().await;
        let sender = match map.get(&ConnectionKey::Pair { owner, opponent }) {
            Some(conn) => KeyState {
                registered: true,
                valid: conn.is_valid,
            },
            None => KeyState::default(),
        };
        let opponent_online = map
            .get(&ConnectionKey::Pair {
                owner: opponent,
                opponent: owner,
            })
            .is_some_and(|conn| conn.is_valid);
        PairPresence {
            sender,
            opponent_online,
        }
    }

    /// Queues a frame for the holder of `key`. Returns false when nobody
    /// holds the key or its writer has gone away.
    pub async fn send(&self, key: ConnectionKey, frame: ServerFrame) -> bool {
        let map = self.inner.read().await;
        match map.get(&key) {
            Some(conn) => conn.tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Like `send`, but only reaches a validated holder.
    pub async fn send_if_valid(&self, key: ConnectionKey, frame: ServerFrame) -> bool {
        let map = self.inner.read().await;
        match map.get(&key) {
            Some(conn) if conn.is_valid => conn.tx.send(frame).is_ok(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(owner: UserId, opponent: UserId) -> ConnectionKey {
        ConnectionKey::Pair { owner, opponent }
    }

    #[tokio::test]
    async fn registered_sockets_start_unvalidated() {
        let registry = Registry::new();
        let key = pair(1, 2);

        registry.register(key).await.unwrap();
        let state = registry.key_state(key).await;
        assert!(state.registered);
        assert!(!state.valid);
        assert!(!registry.is_online(key).await);

        registry.validate(key).await;
        assert!(registry.is_online(key).await);
    }

    #[tokio::test]
    async fn unvalidated_holder_is_displaced() {
        let registry = Registry::new();
        let key = ConnectionKey::Recipient(7);

        let (old_conn, _old_rx) = registry.register(key).await.unwrap();
        let (new_conn, _new_rx) = registry.register(key).await.unwrap();

        assert!(!registry.owns(key, old_conn).await);
        assert!(registry.owns(key, new_conn).await);
    }

    #[tokio::test]
    async fn validated_holder_cannot_be_displaced() {
        let registry = Registry::new();
        let key = pair(1, 2);

        let (conn_id, _rx) = registry.register(key).await.unwrap();
        registry.validate(key).await;

        assert!(registry.register(key).await.is_none());
        assert!(registry.owns(key, conn_id).await);
    }

    #[tokio::test]
    async fn stale_close_leaves_the_new_holder_alone() {
        let registry = Registry::new();
        let key = ConnectionKey::Recipient(7);

        let (old_conn, _old_rx) = registry.register(key).await.unwrap();
        let (new_conn, _new_rx) = registry.register(key).await.unwrap();

        assert!(!registry.remove(key, old_conn).await);
        assert!(registry.owns(key, new_conn).await);
        assert!(registry.remove(key, new_conn).await);
        assert!(!registry.key_state(key).await.registered);
    }

    #[tokio::test]
    async fn concurrent_registrations_leave_one_owner() {
        let registry = Registry::new();
        let key = pair(3, 4);

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let registry = registry.clone();
            set.spawn(async move { registry.register(key).await });
        }

        let mut conn_ids = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Some((conn_id, _rx)) = joined.unwrap() {
                conn_ids.push(conn_id);
            }
        }

        let mut owners = 0;
        for conn_id in &conn_ids {
            if registry.owns(key, *conn_id).await {
                owners += 1;
            }
        }
        assert_eq!(owners, 1);

        registry.validate(key).await;
        assert!(registry.register(key).await.is_none());
    }

    #[tokio::test]
    async fn pair_presence_reads_both_directions() {
        let registry = Registry::new();
        let (_, _a_rx) = registry.register(pair(1, 2)).await.unwrap();
        let (_, _b_rx) = registry.register(pair(2, 1)).await.unwrap();
        registry.validate(pair(2, 1)).await;

        let presence = registry.pair_presence(1, 2).await;
        assert!(presence.sender.registered);
        assert!(!presence.sender.valid);
        assert!(presence.opponent_online);

        let reverse = registry.pair_presence(2, 1).await;
        assert!(reverse.sender.valid);
        assert!(!reverse.opponent_online);
    }

    #[tokio::test]
    async fn send_if_valid_skips_unvalidated_holders() {
        let registry = Registry::new();
        let key = ConnectionKey::Recipient(9);
        let (_, mut rx) = registry.register(key).await.unwrap();

        assert!(!registry.send_if_valid(key, ServerFrame::ok("nope")).await);
        registry.validate(key).await;
        assert!(registry.send_if_valid(key, ServerFrame::ok("hi")).await);
        assert_eq!(rx.recv().await.unwrap(), ServerFrame::ok("hi"));
    }

    #[tokio::test]
    async fn reciprocal_swaps_pair_direction_only() {
        assert_eq!(pair(1, 2).reciprocal(), Some(pair(2, 1)));
        assert_eq!(ConnectionKey::Recipient(1).reciprocal(), None);
    }
}
