use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatisfactionRating {
    pub session_id: SessionId,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SatisfactionRating {
    pub fn is_valid_rating(rating: i16) -> bool {
        (1..=5).contains(&rating)
    }
}
