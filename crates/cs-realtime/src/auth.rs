//! Handshake authentication (§4.7): the bearer token carried in the
//! connection's auth payload is either a staff JWT (ADMIN/AGENT) or an opaque
//! ticket token (anonymous PLAYER). Close codes 4001 (invalid/expired token)
//! and 4003 (role not permitted) are returned to the caller, which maps them
//! onto the actual WebSocket close frame.

use cs_core::ids::{TicketId, UserId};
use cs_repo::Repo;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Admin,
    Agent,
    Player,
}

#[derive(Debug, Clone)]
pub struct ConnectionIdentity {
    pub role: ConnectionRole,
    pub user_id: Option<UserId>,
    pub ticket_id: Option<TicketId>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum AuthError {
    InvalidToken,
    RoleNotPermitted,
}

impl AuthError {
    pub fn close_code(self) -> u16 {
        match self {
            AuthError::InvalidToken => 4001,
            AuthError::RoleNotPermitted => 4003,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: uuid::Uuid,
    role: String,
    #[allow(dead_code)]
    exp: u64,
}

/// Tries the token as a staff JWT first; on decode failure, falls back to an
/// opaque ticket token lookup so a player's browser session authenticates
/// the same way its HTTP session did (§6 `/tickets/by-token/:token`).
pub async fn authenticate(repo: &dyn Repo, jwt_secret: &str, token: &str) -> Result<ConnectionIdentity, AuthError> {
    if let Ok(data) = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        let role = match data.claims.role.as_str() {
            "ADMIN" => ConnectionRole::Admin,
            "AGENT" => ConnectionRole::Agent,
            _ => return Err(AuthError::RoleNotPermitted),
        };
        let user_id = UserId::from_uuid(data.claims.sub);
        let user = repo
            .find_user_by_id(user_id)
            .await
            .map_err(|_| AuthError::InvalidToken)?
            .ok_or(AuthError::InvalidToken)?;
        return Ok(ConnectionIdentity {
            role,
            user_id: Some(user_id),
            ticket_id: None,
            display_name: user.real_name.or(Some(user.username)),
        });
    }

    let ticket = repo
        .find_ticket_by_token(token)
        .await
        .map_err(|_| AuthError::InvalidToken)?
        .ok_or(AuthError::InvalidToken)?;
    Ok(ConnectionIdentity {
        role: ConnectionRole::Player,
        user_id: None,
        ticket_id: Some(ticket.id),
        display_name: Some(ticket.player_id_or_name),
    })
}
