use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TicketId, TicketMessageId, UserId};

/// Asynchronous reply log used when no session is active (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketMessage {
    pub id: TicketMessageId,
    pub ticket_id: TicketId,
    /// `None` means the player authored this message.
    pub sender_id: Option<UserId>,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}
