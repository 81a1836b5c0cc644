//! Agent-channel message send and translation (§6, Agent auth).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use cs_core::ids::{MessageId, SessionId};
use cs_core::CsError;
use cs_repo::{Repo, RepoTx};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::AuthedUser;
use crate::error::{ok, ApiError};

#[derive(Debug, Deserialize)]
pub struct AgentSendMessageRequest {
    pub session_id: SessionId,
    pub content: String,
}

/// Alternate HTTP channel to the WS `agent:send-message` event (§6) — useful
/// for an agent console that isn't WS-connected, e.g. a server-side tool.
pub async fn agent_send_message(
    auth: AuthedUser,
    State(state): State<AppState>,
    Json(req): Json<AgentSendMessageRequest>,
) -> Result<Response, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError(CsError::validation("content must not be empty")));
    }
    let message = state.engine().agent_message(req.session_id, auth.user_id, req.content).await?;
    Ok(ok(StatusCode::OK, message))
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub target_lang: String,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub translated_content: String,
    pub source_lang: String,
    pub provider: String,
}

pub async fn translate_message(
    _auth: AuthedUser,
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Json(req): Json<TranslateRequest>,
) -> Result<Response, ApiError> {
    let mut message = state.repo().find_message(message_id).await?.ok_or_else(|| CsError::not_found("message"))?;
    let was_cached = message.cached_translation(&req.target_lang).is_some();
    let translation = state.translation().translate(&message, &req.target_lang).await?;

    if !was_cached {
        message.metadata.insert(
            cs_core::domain::Message::translation_cache_key(&req.target_lang),
            translation.translated_content.clone(),
        );
        let mut tx = state.repo().begin().await?;
        tx.update_message_metadata(&message).await?;
        tx.commit().await?;
    }

    Ok(ok(
        StatusCode::OK,
        TranslateResponse {
            translated_content: translation.translated_content,
            source_lang: translation.source_lang,
            provider: translation.provider,
        },
    ))
}
