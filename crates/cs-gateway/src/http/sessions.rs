//! Session lifecycle endpoints (§6): player-facing (Public) and
//! agent/admin-facing (Bearer auth).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use cs_core::domain::{Message, MessageType, Session, Urgency};
use cs_core::ids::{SessionId, UserId};
use cs_core::CsError;
use cs_engine::TransferOutcome;
use cs_priority::ordering_key;
use cs_repo::Repo;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::{AdminUser, AuthedUser};
use crate::error::{ok, ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub ticket_id: cs_core::ids::TicketId,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Response, ApiError> {
    let outcome = state.engine().create(req.ticket_id).await?;
    let session = match outcome {
        cs_engine::CreateOutcome::Pending(session) => session,
        cs_engine::CreateOutcome::Transferred(_) => state
            .repo()
            .find_live_session_for_ticket(req.ticket_id)
            .await?
            .ok_or_else(|| CsError::not_found("session"))?,
    };
    Ok(ok(StatusCode::CREATED, session))
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<SessionId>) -> Result<Response, ApiError> {
    let session = state.repo().find_session(id).await?.ok_or_else(|| CsError::not_found("session"))?;
    Ok(ok(StatusCode::OK, session))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub message_type: Option<MessageType>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub player_message: Message,
}

pub async fn player_send_message(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError(CsError::validation("content must not be empty")));
    }
    let player_message = state.engine().player_message(id, req.content).await?;
    Ok(ok(StatusCode::OK, SendMessageResponse { player_message }))
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub urgency: Urgency,
    #[serde(default)]
    pub issue_type_id: Option<cs_core::ids::IssueTypeId>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub queued: bool,
    pub converted_to_ticket: bool,
    pub queue_position: Option<u32>,
    pub estimated_wait_time_minutes: Option<u32>,
    pub ticket_no: Option<String>,
}

pub async fn transfer_to_agent(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<TransferRequest>,
) -> Result<Response, ApiError> {
    let reason = req.reason.unwrap_or_else(|| format!("player_requested_{:?}", req.urgency));
    let outcome = state.engine().transfer_to_agent(id, reason).await?;
    let response = match outcome {
        TransferOutcome::Assigned(_) => TransferResponse {
            queued: false,
            converted_to_ticket: false,
            queue_position: None,
            estimated_wait_time_minutes: None,
            ticket_no: None,
        },
        TransferOutcome::Queued(pos) => TransferResponse {
            queued: true,
            converted_to_ticket: false,
            queue_position: Some(pos.rank),
            estimated_wait_time_minutes: pos.eta_minutes,
            ticket_no: None,
        },
        TransferOutcome::ConvertedToTicket { ticket_no } => TransferResponse {
            queued: false,
            converted_to_ticket: true,
            queue_position: None,
            estimated_wait_time_minutes: None,
            ticket_no: Some(ticket_no),
        },
    };
    Ok(ok(StatusCode::OK, response))
}

pub async fn close_by_player(State(state): State<AppState>, Path(id): Path<SessionId>) -> Result<Response, ApiError> {
    let session = state.engine().close_by_player(id).await?;
    Ok(ok(StatusCode::OK, session))
}

pub async fn close_by_agent(
    _auth: AuthedUser,
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Response, ApiError> {
    let session = state.engine().close_by_agent(id).await?;
    Ok(ok(StatusCode::OK, session))
}

#[derive(Debug, Serialize)]
pub struct QueuedSessionView {
    #[serde(flatten)]
    pub session: Session,
    pub rank: u32,
}

pub async fn workbench_queued(
    _auth: AuthedUser,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let mut sessions = state.repo().list_queued_sessions(None).await?;
    sessions.sort_by_key(ordering_key);
    let views: Vec<_> = sessions
        .into_iter()
        .enumerate()
        .map(|(i, session)| QueuedSessionView { session, rank: i as u32 + 1 })
        .collect();
    Ok(ok(StatusCode::OK, views))
}

pub async fn join_session(
    auth: AuthedUser,
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Response, ApiError> {
    let session = state.engine().agent_join(id, auth.user_id).await?;
    Ok(ok(StatusCode::OK, session))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub agent_id: UserId,
}

pub async fn assign_session(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<AssignRequest>,
) -> Result<Response, ApiError> {
    let session = state.repo().find_session(id).await?.ok_or_else(|| CsError::not_found("session"))?;
    let ticket = state.repo().find_ticket(session.ticket_id).await?.ok_or_else(|| CsError::not_found("ticket"))?;
    let updated = state.engine().queue().assign(ticket.game_id, id, req.agent_id).await?;
    Ok(ok(StatusCode::OK, updated))
}
