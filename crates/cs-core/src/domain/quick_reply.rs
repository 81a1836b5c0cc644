use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{QuickReplyCategoryId, QuickReplyId};

/// Consumed only by the HTTP surface as plain CRUD; not modeled further (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickReplyCategory {
    pub id: QuickReplyCategoryId,
    pub name: String,
    pub sort_order: i32,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickReply {
    pub id: QuickReplyId,
    pub category_id: Option<QuickReplyCategoryId>,
    pub title: String,
    pub body: String,
    pub usage_count: i64,
    pub is_favorite: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}
