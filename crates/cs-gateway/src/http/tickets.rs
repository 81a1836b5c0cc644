//! Ticket creation and lookup (§6, all Public).

use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use cs_core::domain::{Attachment, Ticket, TicketPriority, TicketStatus};
use cs_core::ids::{GameId, IssueTypeId, ServerId, TicketId};
use cs_core::CsError;
use cs_engine::CreateOutcome;
use cs_repo::{Repo, RepoTx};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::{ok, ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub game_id: GameId,
    pub server_id: Option<ServerId>,
    pub server_name: Option<String>,
    pub player_id_or_name: String,
    pub description: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub payment_order_no: Option<String>,
    #[serde(default)]
    pub issue_type_ids: Vec<IssueTypeId>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
pub struct CreateTicketResponse {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub has_online_agents: bool,
    pub session_created: bool,
    pub session_id: Option<cs_core::ids::SessionId>,
}

fn ticket_number(game_id: GameId, seq: u32) -> String {
    format!("G{}-{}-{:03}", &game_id.to_string()[..4], Utc::now().format("%Y%m%d"), seq)
}

pub async fn create_ticket(
    State(state): State<AppState>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<Response, ApiError> {
    if req.player_id_or_name.trim().is_empty() {
        return Err(ApiError(CsError::validation("playerIdOrName is required")));
    }
    if req.issue_type_ids.is_empty() {
        return Err(ApiError(CsError::validation("issueTypeIds must not be empty")));
    }

    let issue_type_ids: BTreeSet<_> = req.issue_type_ids.iter().copied().collect();
    let primary_issue_type = *req.issue_type_ids.first().ok_or_else(|| CsError::validation("issueTypeIds must not be empty"))?;

    let server_key = match (&req.server_id, &req.server_name) {
        (Some(id), _) => id.to_string(),
        (None, Some(name)) => name.clone(),
        (None, None) => String::new(),
    };
    if let Some(existing) = state
        .repo()
        .find_open_ticket(req.game_id, &server_key, &req.player_id_or_name, primary_issue_type)
        .await?
    {
        return Err(ApiError(CsError::conflict(format!(
            "player already has an open ticket ({})",
            existing.ticket_no
        ))));
    }

    let now = Utc::now();
    let ticket = Ticket {
        id: TicketId::new(),
        ticket_no: ticket_number(req.game_id, (now.timestamp_millis() % 1000) as u32),
        token: uuid::Uuid::new_v4().to_string(),
        game_id: req.game_id,
        server_id: req.server_id,
        server_name: req.server_name,
        player_id_or_name: req.player_id_or_name,
        description: req.description,
        occurred_at: req.occurred_at,
        payment_order_no: req.payment_order_no,
        status: TicketStatus::New,
        priority: TicketPriority::Normal,
        issue_type_ids,
        attachments: req.attachments,
        created_at: now,
        updated_at: now,
    };
    {
        let mut tx = state.repo().begin().await?;
        tx.insert_ticket(&ticket).await?;
        tx.commit().await?;
    }

    let has_online_agents = !state.repo().list_online_agents().await?.is_empty();
    let outcome = state.engine().create(ticket.id).await?;
    let (session_created, session_id) = match outcome {
        CreateOutcome::Pending(session) => (true, Some(session.id)),
        CreateOutcome::Transferred(_) => (true, state.repo().find_live_session_for_ticket(ticket.id).await?.map(|s| s.id)),
    };

    Ok(ok(
        StatusCode::CREATED,
        CreateTicketResponse {
            ticket,
            has_online_agents,
            session_created,
            session_id,
        },
    ))
}

pub async fn get_ticket_by_token(State(state): State<AppState>, Path(token): Path<String>) -> Result<Response, ApiError> {
    let ticket = state
        .repo()
        .find_ticket_by_token(&token)
        .await?
        .ok_or_else(|| CsError::not_found("ticket"))?;
    Ok(ok(StatusCode::OK, ticket))
}

pub async fn get_ticket_by_no(State(state): State<AppState>, Path(ticket_no): Path<String>) -> Result<Response, ApiError> {
    let ticket = state
        .repo()
        .find_ticket_by_no(&ticket_no)
        .await?
        .ok_or_else(|| CsError::not_found("ticket"))?;
    Ok(ok(StatusCode::OK, ticket))
}
