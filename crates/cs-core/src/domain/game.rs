use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GameId, ServerId};

/// A tenant. Owns AI credentials used by `cs-ai` for triage/chat calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub name: String,
    pub enabled: bool,
    /// AES-256-GCM ciphertext (nonce-prefixed, base64) of the provider API key.
    pub ai_credential_ciphertext: String,
    pub ai_base_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A shard within a game. Optional in ticket submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub game_id: GameId,
    pub name: String,
    pub enabled: bool,
}
