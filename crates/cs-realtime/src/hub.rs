//! `RealtimeHub` (§4.7): connection registry, room membership, and the
//! egress engine, generalized from the teacher's
//! `wsprism-gateway/src/realtime/core/realtime.rs` (`RealtimeCore::
//! send_to_session`/`publish_room_*`) from per-connection `try_send`
//! (lossy) broadcast to an awaited, bounded-timeout send per member so the
//! ordering guarantee (§4.7 "broadcasts in the same order the SessionEngine
//! committed them") holds even under backpressure.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use cs_core::ids::{SessionId, TicketId, UserId};
use cs_core::protocol::events::{AgentStatusPayload, ServerEvent};
use cs_core::{CsError, Result};
use cs_engine::{Broadcaster, SessionEngine};
use cs_repo::Repo;
use dashmap::DashMap;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::auth::ConnectionIdentity;
use crate::presence::{PresenceIndex, Room};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::RealtimeConfig;

/// Per-member send deadline before a stuck connection is skipped rather than
/// blocking the whole broadcast.
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RealtimeHub {
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) presence: Arc<PresenceIndex>,
    pub(crate) repo: Arc<dyn Repo>,
    pub(crate) config: RealtimeConfig,
    engine: OnceLock<Arc<SessionEngine>>,
    offline_timers: DashMap<UserId, JoinHandle<()>>,
    weak_self: std::sync::Weak<RealtimeHub>,
}

impl RealtimeHub {
    pub fn new(repo: Arc<dyn Repo>, config: RealtimeConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            registry: Arc::new(ConnectionRegistry::new()),
            presence: Arc::new(PresenceIndex::new()),
            repo,
            config,
            engine: OnceLock::new(),
            offline_timers: DashMap::new(),
            weak_self: weak.clone(),
        })
    }

    /// Completes the hub<->engine wiring once the engine has been constructed
    /// with this hub as its `Broadcaster` (`cs-gateway`'s bootstrap, mirroring
    /// `app_state.rs`'s multi-`Arc` construction order in the teacher).
    pub fn set_engine(&self, engine: Arc<SessionEngine>) {
        let _ = self.engine.set(engine);
    }

    pub(crate) fn engine(&self) -> Result<Arc<SessionEngine>> {
        self.engine
            .get()
            .cloned()
            .ok_or_else(|| CsError::Internal("realtime hub used before engine was wired".to_string()))
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn presence(&self) -> Arc<PresenceIndex> {
        self.presence.clone()
    }

    /// Registers a newly-authenticated connection; for AGENT/ADMIN identities
    /// this cancels any pending offline-grace timer and marks the user online.
    pub async fn register(&self, conn_id: ConnectionId, conn: Connection) {
        self.registry.insert(conn_id, conn.clone());
        if let Some(user_id) = conn.identity.user_id {
            if let Some((_, handle)) = self.offline_timers.remove(&user_id) {
                handle.abort();
            }
            self.presence.join(&Room::Presence, conn_id);
            let _ = self.mark_online(user_id, true).await;
        }
    }

    /// Starts (or restarts) the presence grace window for a disconnected
    /// agent/admin connection (§4.7). Cancelled by [`Self::register`] if the
    /// same user reconnects within the window.
    pub fn disconnect(&self, conn_id: ConnectionId) {
        let identity = self.registry.get(conn_id).map(|c| c.identity);
        self.presence.leave_all(conn_id);
        self.registry.remove(conn_id);

        let Some(identity) = identity else { return };
        let Some(user_id) = identity.user_id else { return };
        // Another tab for the same user is still open; presence stands.
        if self.registry.count_for_user(user_id) > 0 {
            return;
        }

        let hub = self.weak_self.clone();
        let grace = Duration::from_millis(self.config.presence_grace_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(hub) = hub.upgrade() {
                if hub.registry.count_for_user(user_id) == 0 {
                    let _ = hub.mark_online(user_id, false).await;
                }
                hub.offline_timers.remove(&user_id);
            }
        });
        self.offline_timers.insert(user_id, handle);
    }

    async fn mark_online(&self, user_id: UserId, is_online: bool) -> Result<()> {
        let Some(mut user) = self.repo.find_user_by_id(user_id).await? else {
            return Ok(());
        };
        if user.is_online == is_online {
            return Ok(());
        }
        user.is_online = is_online;
        {
            let mut tx = self.repo.begin().await?;
            tx.update_user(&user).await?;
            tx.commit().await?;
        }
        let payload = AgentStatusPayload {
            agent_id: user_id.to_string(),
            is_online,
            display_name: user.real_name.or(Some(user.username)),
        };
        self.publish(&Room::Presence, ServerEvent::AgentStatusChanged(payload)).await;
        Ok(())
    }

    /// Whether `identity` may join `room` (§4.7 room participant rules): a
    /// player only the rooms of the ticket/session they created, staff any
    /// session/ticket room, and `presence` only by already-authenticated
    /// staff (players never see it).
    pub async fn authorize_join(&self, identity: &ConnectionIdentity, room: &Room) -> Result<bool> {
        use crate::auth::ConnectionRole;
        match (identity.role, room) {
            (ConnectionRole::Admin, _) | (ConnectionRole::Agent, Room::Session(_) | Room::Ticket(_)) => Ok(true),
            (ConnectionRole::Agent, Room::Presence) => Ok(true),
            (ConnectionRole::Player, Room::Ticket(ticket_id)) => Ok(identity.ticket_id == Some(*ticket_id)),
            (ConnectionRole::Player, Room::Session(session_id)) => {
                let Some(session) = self.repo.find_session(*session_id).await? else {
                    return Ok(false);
                };
                Ok(identity.ticket_id == Some(session.ticket_id))
            }
            (ConnectionRole::Player, Room::Presence) => Ok(false),
        }
    }

    pub async fn publish(&self, room: &Room, event: ServerEvent) {
        let members = self.presence.members(room);
        if members.is_empty() {
            return;
        }
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(%err, "failed to encode server event");
                return;
            }
        };

        let mut sends = FuturesUnordered::new();
        for member in members {
            let Some(conn) = self.registry.get(member) else { continue };
            let msg = Message::Text(text.clone());
            sends.push(async move {
                if tokio::time::timeout(SEND_TIMEOUT, conn.tx.send(msg)).await.is_err() {
                    tracing::warn!(room = %room.key(), "broadcast send timed out, connection likely stuck");
                }
            });
        }
        while sends.next().await.is_some() {}
    }
}

#[async_trait]
impl Broadcaster for RealtimeHub {
    async fn to_session(&self, session_id: SessionId, event: ServerEvent) {
        self.publish(&Room::Session(session_id), event).await;
    }

    async fn to_ticket(&self, ticket_id: TicketId, event: ServerEvent) {
        self.publish(&Room::Ticket(ticket_id), event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ConnectionRole;
    use crate::registry::Connection;
    use axum::extract::ws::Message as WsMessage;
    use cs_core::domain::{Session, SessionStatus, Ticket, TicketPriority, TicketStatus};
    use cs_core::ids::TicketId;
    use cs_repo::MemoryRepo;
    use std::collections::{BTreeMap, BTreeSet};
    use tokio::sync::mpsc;

    fn ticket(id: TicketId) -> Ticket {
        Ticket {
            id,
            ticket_no: "G-1".to_string(),
            token: "tok-1".to_string(),
            game_id: cs_core::ids::GameId::new(),
            server_id: None,
            server_name: None,
            player_id_or_name: "player1".to_string(),
            description: "broken".to_string(),
            occurred_at: None,
            payment_order_no: None,
            status: TicketStatus::New,
            priority: TicketPriority::Normal,
            issue_type_ids: BTreeSet::new(),
            attachments: vec![],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn session(ticket_id: TicketId) -> Session {
        Session {
            id: SessionId::new(),
            ticket_id,
            status: SessionStatus::Pending,
            agent_id: None,
            priority_score: 0.0,
            detected_intent: None,
            ai_urgency: None,
            ai_conversation_handle: None,
            allow_manual_transfer: true,
            queued_at: None,
            started_at: None,
            closed_at: None,
            transfer_at: None,
            transfer_reason: None,
            metadata: BTreeMap::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn player_may_only_join_their_own_ticket_session() {
        let memory = MemoryRepo::new();
        let t = ticket(TicketId::new());
        let other_ticket = ticket(TicketId::new());
        let s = session(t.id);
        {
            let mut tx = memory.begin().await.expect("begin");
            tx.insert_ticket(&t).await.expect("insert ticket");
            tx.insert_ticket(&other_ticket).await.expect("insert ticket");
            tx.insert_session(&s).await.expect("insert session");
            tx.commit().await.expect("commit");
        }
        let hub = RealtimeHub::new(Arc::new(memory), RealtimeConfig::default());

        let owner = ConnectionIdentity {
            role: ConnectionRole::Player,
            user_id: None,
            ticket_id: Some(t.id),
            display_name: None,
        };
        let stranger = ConnectionIdentity {
            role: ConnectionRole::Player,
            user_id: None,
            ticket_id: Some(other_ticket.id),
            display_name: None,
        };

        assert!(hub.authorize_join(&owner, &Room::Session(s.id)).await.expect("authorize"));
        assert!(!hub.authorize_join(&stranger, &Room::Session(s.id)).await.expect("authorize"));
    }

    #[tokio::test]
    async fn staff_may_join_any_session_room() {
        let memory = MemoryRepo::new();
        let t = ticket(TicketId::new());
        let s = session(t.id);
        {
            let mut tx = memory.begin().await.expect("begin");
            tx.insert_ticket(&t).await.expect("insert ticket");
            tx.insert_session(&s).await.expect("insert session");
            tx.commit().await.expect("commit");
        }
        let hub = RealtimeHub::new(Arc::new(memory), RealtimeConfig::default());
        let agent = ConnectionIdentity {
            role: ConnectionRole::Agent,
            user_id: Some(cs_core::ids::UserId::new()),
            ticket_id: None,
            display_name: None,
        };
        assert!(hub.authorize_join(&agent, &Room::Session(s.id)).await.expect("authorize"));
    }

    #[tokio::test]
    async fn publish_delivers_to_every_room_member() {
        let memory = MemoryRepo::new();
        let hub = RealtimeHub::new(Arc::new(memory), RealtimeConfig::default());
        let room = Room::Session(SessionId::new());

        let (tx1, mut rx1) = mpsc::channel::<WsMessage>(8);
        let (tx2, mut rx2) = mpsc::channel::<WsMessage>(8);
        let conn1 = ConnectionId::new();
        let conn2 = ConnectionId::new();
        let identity = ConnectionIdentity {
            role: ConnectionRole::Player,
            user_id: None,
            ticket_id: None,
            display_name: None,
        };
        hub.registry.insert(conn1, Connection { tx: tx1, identity: identity.clone() });
        hub.registry.insert(conn2, Connection { tx: tx2, identity });
        hub.presence.join(&room, conn1);
        hub.presence.join(&room, conn2);

        hub.publish(&room, ServerEvent::Pong).await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
