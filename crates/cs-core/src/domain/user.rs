use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Agent,
}

/// An agent or administrator. Players/anonymous connections carry no `User`
/// row — they are identified by ticket token only (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub real_name: Option<String>,
    pub is_online: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}
