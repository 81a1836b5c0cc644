//! The engine's fan-out seam (§4.6, §4.7): the engine only knows it can push
//! an event at a session's room or a ticket's room, the way the teacher's
//! `RealtimeCore::send_to_session`/`publish_room_*` decouple policy/engine
//! code from the websocket transport. Implemented by `cs-realtime`.

use async_trait::async_trait;
use cs_core::ids::{SessionId, TicketId};
use cs_core::protocol::events::{QueueUpdatePayload, ServerEvent};
use cs_queue::QueueBroadcaster;

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn to_session(&self, session_id: SessionId, event: ServerEvent);
    async fn to_ticket(&self, ticket_id: TicketId, event: ServerEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcaster;

#[async_trait]
impl Broadcaster for NullBroadcaster {
    async fn to_session(&self, _session_id: SessionId, _event: ServerEvent) {}
    async fn to_ticket(&self, _ticket_id: TicketId, _event: ServerEvent) {}
}

/// Adapts the engine's richer [`Broadcaster`] to `cs-queue`'s narrow
/// [`QueueBroadcaster`] seam, so `cs-queue` never has to depend on this trait
/// or on the realtime transport crate that implements it.
pub(crate) struct QueueBroadcasterAdapter<B: ?Sized>(pub(crate) std::sync::Arc<B>);

#[async_trait]
impl<B: Broadcaster + ?Sized> QueueBroadcaster for QueueBroadcasterAdapter<B> {
    async fn new_session(&self, session: &cs_core::domain::Session) {
        self.0.to_session(session.id, ServerEvent::NewSession(session.clone())).await;
    }

    async fn queue_update(&self, session_id: SessionId, position: u32, eta_minutes: Option<u32>) {
        self.0
            .to_session(
                session_id,
                ServerEvent::QueueUpdate(QueueUpdatePayload {
                    session_id,
                    position,
                    eta_minutes,
                }),
            )
            .await;
    }
}
