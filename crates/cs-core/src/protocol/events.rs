//! Server -> client and client -> server event envelopes (§4.7).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{Message, Session, Ticket, TicketMessage};
use crate::ids::{SessionId, TicketId};

/// Sparse partial update, e.g. `{"status": "QUEUED"}`. Kept as a JSON map
/// rather than `Partial<Session>` generics: the wire shape only ever needs to
/// be serialized, never parsed back into a typed struct on this side.
pub type PartialFields = Map<String, Value>;

#[derive(Debug, Clone, Serialize)]
pub struct QueueUpdatePayload {
    pub session_id: SessionId,
    pub position: u32,
    pub eta_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    pub session_id: SessionId,
    pub message: Message,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusPayload {
    pub agent_id: String,
    pub is_online: bool,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: u32,
    pub msg: String,
    pub event: Option<String>,
}

impl ErrorPayload {
    /// The one stable rate-limit code named in the spec (§4.7, §7).
    pub const RATE_LIMITED: u32 = 429_001;

    pub fn rate_limited(event: Option<&str>) -> Self {
        Self {
            code: Self::RATE_LIMITED,
            msg: "rate limit exceeded".to_string(),
            event: event.map(str::to_string),
        }
    }
}

/// Server -> client events, tagged on the wire as `{"event": "...", "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewSession(Session),
    SessionUpdate(PartialFields),
    QueueUpdate(QueueUpdatePayload),
    Message(MessagePayload),
    TicketMessage(TicketMessage),
    TicketUpdate(PartialFields),
    AgentStatusChanged(AgentStatusPayload),
    Error(ErrorPayload),
    Pong,
}

/// Client -> server events, each acknowledged via `WsAck`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinSession { session_id: SessionId },
    LeaveSession { session_id: SessionId },
    #[serde(rename = "agent:send-message")]
    AgentSendMessage {
        session_id: SessionId,
        content: String,
        /// Client-generated correlation id for dedupe on reconnect (§5).
        temp_id: Option<String>,
    },
    JoinTicket { ticket_id: TicketId },
    Ping,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct WsAck {
    pub success: bool,
    pub error: Option<String>,
    pub message_id: Option<String>,
}

impl WsAck {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn ok_with_message_id(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
