use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SenderType {
    Player,
    Agent,
    Ai,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Image,
    SystemNotice,
}

/// Append-only; ordering within a session is `created_at` ascending (§3, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub sender_type: SenderType,
    pub message_type: MessageType,
    /// A URL when `message_type == Image`.
    pub content: String,
    pub agent_id: Option<UserId>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Cache key used for translation idempotence (§4.3, §8).
    pub fn translation_cache_key(target_lang: &str) -> String {
        format!("translation:{target_lang}")
    }

    pub fn cached_translation(&self, target_lang: &str) -> Option<&str> {
        self.metadata
            .get(&Self::translation_cache_key(target_lang))
            .map(String::as_str)
    }
}
