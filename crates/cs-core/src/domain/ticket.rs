use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GameId, IssueTypeId, ServerId, TicketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketStatus {
    New,
    InProgress,
    Waiting,
    Resolved,
    Closed,
}

impl TicketStatus {
    /// Tickets in these states no longer count against the unique
    /// open-ticket key (§3 invariant, §8 property).
    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TicketPriority {
    /// Base priority contribution used by the scorer (§4.4).
    pub fn base_score(self) -> f64 {
        match self {
            TicketPriority::Low => 0.0,
            TicketPriority::Normal => 25.0,
            TicketPriority::High => 60.0,
            TicketPriority::Urgent => 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: uuid::Uuid,
    pub file_url: String,
    pub file_name: String,
    pub file_type: Option<String>,
}

/// The durable record of a player-reported problem (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    /// Human-readable, game-prefixed, daily-sequenced (e.g. `G1-20260727-001`).
    pub ticket_no: String,
    /// Opaque URL-safe token used by the player-facing URL. Immutable.
    pub token: String,
    pub game_id: GameId,
    pub server_id: Option<ServerId>,
    pub server_name: Option<String>,
    pub player_id_or_name: String,
    pub description: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub payment_order_no: Option<String>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub issue_type_ids: BTreeSet<IssueTypeId>,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// The composite key guarded by the partial unique index (§3, §6).
    /// `server_key` is the server id when known, else the free-text server
    /// name, else an empty string — matching how the original distinguishes
    /// "no server" from "named server with no catalog row".
    pub fn server_key(&self) -> String {
        match (&self.server_id, &self.server_name) {
            (Some(id), _) => id.to_string(),
            (None, Some(name)) => name.clone(),
            (None, None) => String::new(),
        }
    }
}
