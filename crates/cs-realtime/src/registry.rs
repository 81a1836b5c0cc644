//! Per-connection outbound queue registry, generalized from the teacher's
//! `wsprism-gateway/src/realtime/core/session_registry.rs` (`user_id ->
//! Connection`, one entry per logged-in user) to `ConnectionId -> Connection`
//! since a single user/ticket may open more than one tab/session at once.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::auth::ConnectionIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub fn new() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct Connection {
    pub tx: mpsc::Sender<Message>,
    pub identity: ConnectionIdentity,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    conns: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ConnectionId, conn: Connection) {
        self.conns.insert(id, conn);
    }

    pub fn remove(&self, id: ConnectionId) {
        self.conns.remove(id);
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.conns.get(&id).map(|r| r.value().clone())
    }

    /// Count of connections currently held by the given agent/admin, used to
    /// decide whether flipping `isOnline=false` is still warranted once the
    /// presence grace window for one of their connections elapses.
    pub fn count_for_user(&self, user_id: cs_core::ids::UserId) -> usize {
        self.conns.iter().filter(|r| r.value().identity.user_id == Some(user_id)).count()
    }
}
