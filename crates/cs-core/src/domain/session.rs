use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, TicketId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Pending,
    Queued,
    InProgress,
    Closed,
}

impl SessionStatus {
    /// True for the states counted by the "at most one live session per
    /// ticket" invariant (§3, §8).
    pub fn is_live(self) -> bool {
        !matches!(self, SessionStatus::Closed)
    }

    /// The DAG edges allowed out of this state (§8 invariant). Transitions
    /// are validated against this before any mutation is applied.
    pub fn allowed_next(self) -> &'static [SessionStatus] {
        match self {
            SessionStatus::Pending => &[
                SessionStatus::Queued,
                SessionStatus::InProgress,
                SessionStatus::Closed,
            ],
            SessionStatus::Queued => &[SessionStatus::InProgress, SessionStatus::Closed],
            SessionStatus::InProgress => &[SessionStatus::Closed],
            SessionStatus::Closed => &[],
        }
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        self.allowed_next().contains(&next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Urgent,
    NonUrgent,
}

/// A live conversational context bound to a ticket (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub ticket_id: TicketId,
    pub status: SessionStatus,
    pub agent_id: Option<UserId>,
    pub priority_score: f64,
    pub detected_intent: Option<String>,
    pub ai_urgency: Option<Urgency>,
    pub ai_conversation_handle: Option<String>,
    pub allow_manual_transfer: bool,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub transfer_at: Option<DateTime<Utc>>,
    pub transfer_reason: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn player_language(&self) -> Option<&str> {
        self.metadata.get("playerLanguage").map(String::as_str)
    }

    /// `agentId ≠ null ⇔ status = IN_PROGRESS` (§8 invariant).
    pub fn satisfies_agent_invariant(&self) -> bool {
        self.agent_id.is_some() == (self.status == SessionStatus::InProgress)
    }
}
