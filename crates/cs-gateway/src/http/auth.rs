//! `POST /auth/login` (§6, Public).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::{issue_token, verify_password};
use crate::error::{ok, ApiError};
use cs_core::CsError;
use cs_repo::Repo;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: cs_core::domain::User,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Response, ApiError> {
    let user = state
        .repo()
        .find_user_by_username(&req.username)
        .await?
        .ok_or(CsError::AuthFailed)?;
    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError(CsError::AuthFailed));
    }
    let access_token = issue_token(&state.cfg().jwt_secret, user.id, user.role)?;
    Ok(ok(StatusCode::OK, LoginResponse { access_token, user }))
}
