//! Room membership (§4.7): `session:{id}`, `ticket:{id}`, and the admin-scope
//! `presence` room. Grounded on the teacher's
//! `wsprism-gateway/src/realtime/core/presence.rs` room/user bidirectional
//! index, generalized from `String` user keys to this crate's
//! [`crate::registry::ConnectionId`].

use dashmap::{DashMap, DashSet};

use crate::registry::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Session(cs_core::ids::SessionId),
    Ticket(cs_core::ids::TicketId),
    Presence,
}

impl Room {
    pub fn key(&self) -> String {
        match self {
            Room::Session(id) => format!("session:{id}"),
            Room::Ticket(id) => format!("ticket:{id}"),
            Room::Presence => "presence".to_string(),
        }
    }
}

#[derive(Default)]
pub struct PresenceIndex {
    room_to_conns: DashMap<String, DashSet<ConnectionId>>,
    conn_to_rooms: DashMap<ConnectionId, DashSet<String>>,
}

impl PresenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: joining a room twice is a no-op (§4.7).
    pub fn join(&self, room: &Room, conn: ConnectionId) {
        let key = room.key();
        self.room_to_conns.entry(key.clone()).or_insert_with(DashSet::new).insert(conn);
        self.conn_to_rooms.entry(conn).or_insert_with(DashSet::new).insert(key);
    }

    pub fn leave(&self, room: &Room, conn: ConnectionId) {
        let key = room.key();
        if let Some(set) = self.room_to_conns.get(&key) {
            set.remove(&conn);
        }
        if let Some(set) = self.conn_to_rooms.get(&conn) {
            set.remove(&key);
        }
    }

    pub fn members(&self, room: &Room) -> Vec<ConnectionId> {
        self.room_to_conns.get(&room.key()).map(|set| set.iter().map(|c| *c).collect()).unwrap_or_default()
    }

    /// Removes a closed connection from every room it had joined.
    pub fn leave_all(&self, conn: ConnectionId) {
        if let Some((_, rooms)) = self.conn_to_rooms.remove(&conn) {
            for room_key in rooms.iter() {
                if let Some(set) = self.room_to_conns.get(room_key.key()) {
                    set.remove(&conn);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_core::ids::SessionId;

    #[test]
    fn join_is_idempotent_and_leave_all_clears_every_room() {
        let idx = PresenceIndex::new();
        let conn = ConnectionId::new();
        let session_room = Room::Session(SessionId::new());
        idx.join(&session_room, conn);
        idx.join(&session_room, conn);
        assert_eq!(idx.members(&session_room).len(), 1);

        idx.join(&Room::Presence, conn);
        idx.leave_all(conn);
        assert!(idx.members(&session_room).is_empty());
        assert!(idx.members(&Room::Presence).is_empty());
    }
}
