//! The narrow fan-out seam the scheduler pushes `new-session`/`queue-update`
//! through (§4.5, §4.7). Kept separate from the richer session/message
//! broadcasting `cs-engine` needs so this crate never depends on the realtime
//! transport crate — the same way `cs-priority` stays decoupled from I/O.

use async_trait::async_trait;
use cs_core::domain::Session;
use cs_core::ids::SessionId;

#[async_trait]
pub trait QueueBroadcaster: Send + Sync {
    async fn new_session(&self, session: &Session);
    async fn queue_update(&self, session_id: SessionId, position: u32, eta_minutes: Option<u32>);
}

/// A broadcaster that does nothing; used wherever queue mutations run without
/// a realtime hub attached (tests, offline backfills).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcaster;

#[async_trait]
impl QueueBroadcaster for NullBroadcaster {
    async fn new_session(&self, _session: &Session) {}
    async fn queue_update(&self, _session_id: SessionId, _position: u32, _eta_minutes: Option<u32>) {}
}
