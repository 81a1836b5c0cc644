//! Staff authentication: password hashing (`argon2`) and JWT issuance/
//! verification (`jsonwebtoken`), mirroring the credential-handling idiom
//! `cs-ai::crypto` uses for provider keys — secrets only ever exist as
//! opaque, already-hashed/encrypted values outside this module.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use cs_core::domain::Role;
use cs_core::ids::UserId;
use cs_core::{CsError, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::ApiError;

const TOKEN_TTL_SECS: u64 = 12 * 3600;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: uuid::Uuid,
    pub role: String,
    pub exp: u64,
}

pub fn hash_password(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CsError::Internal(format!("password hash failed: {e}")))
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    Argon2::default().verify_password(plain.as_bytes(), &parsed).is_ok()
}

pub fn issue_token(jwt_secret: &str, user_id: UserId, role: Role) -> Result<String> {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: user_id.into_uuid(),
        role: match role {
            Role::Admin => "ADMIN".to_string(),
            Role::Agent => "AGENT".to_string(),
        },
        exp: now + TOKEN_TTL_SECS,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(jwt_secret.as_bytes()))
        .map_err(|e| CsError::Internal(format!("jwt encode failed: {e}")))
}

/// The authenticated staff principal for a request (§6 "Bearer auth...
/// except routes explicitly marked Public").
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: UserId,
    pub role: Role,
}

impl AuthedUser {
    pub fn require_admin(&self) -> Result<()> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(CsError::Forbidden("admin role required".to_string()))
        }
    }
}

impl<S> FromRequestParts<S> for AuthedUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(parts).ok_or(ApiError(CsError::AuthFailed))?;
        decode_bearer(&app_state, &token)
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    header.strip_prefix("Bearer ").map(|s| s.to_string())
}

fn decode_bearer(state: &AppState, token: &str) -> std::result::Result<AuthedUser, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.cfg().jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError(CsError::AuthFailed))?;
    let role = match data.claims.role.as_str() {
        "ADMIN" => Role::Admin,
        "AGENT" => Role::Agent,
        _ => return Err(ApiError(CsError::AuthFailed)),
    };
    Ok(AuthedUser {
        user_id: UserId::from_uuid(data.claims.sub),
        role,
    })
}

/// Same check as `AuthedUser` but only accepts `Role::Admin`; used on
/// `POST /sessions/:id/assign`.
pub struct AdminUser(pub AuthedUser);

impl<S> FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let user = AuthedUser::from_request_parts(parts, state).await?;
        user.require_admin().map_err(ApiError)?;
        Ok(AdminUser(user))
    }
}
