use serde::{Deserialize, Serialize};

use crate::ids::{GameId, IssueTypeId};

/// A classification with a routing hint (§4.4, §4.6 direct-transfer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueType {
    pub id: IssueTypeId,
    pub game_id: GameId,
    pub name: String,
    /// Contribution to the priority score, clamped to [0, 100] at write time.
    pub priority_weight: i32,
    /// When true, session creation skips PENDING and enqueues immediately.
    pub require_direct_transfer: bool,
    pub enabled: bool,
    pub sort_order: i32,
}

impl IssueType {
    /// Weight clamped into the scorer's expected range; defensive against a
    /// bad catalog entry reaching the scorer.
    pub fn clamped_weight(&self) -> f64 {
        (self.priority_weight as f64).clamp(0.0, 100.0)
    }
}
