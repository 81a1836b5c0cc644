//! Axum router wiring: `/api/v1` REST surface, `/v1/ws` upgrade, ops endpoints.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::Method;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::http;
use crate::rate_limit::{self, RateLimitClass};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

pub async fn ws_upgrade(State(state): State<AppState>, Query(q): Query<WsQuery>, ws: WebSocketUpgrade) -> impl IntoResponse {
    state.metrics().ws_upgrades.inc(&[]);
    ws.on_upgrade(move |socket| async move {
        state.metrics().ws_active_connections.add(&[], 1);
        cs_realtime::handle_connection(state.hub().clone(), q.token, socket).await;
        state.metrics().ws_active_connections.add(&[], -1);
    })
}

async fn track_http_metrics(
    State(state): State<AppState>,
    req: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    state.metrics().http_requests.inc(&[("method", &method), ("path", &path), ("status", &status)]);
    state.metrics().http_request_duration.observe(&[("method", &method), ("path", &path)], start.elapsed());
    response
}

/// Classifies a request as AGENT-rate-limited when it carries a bearer
/// token, PLAYER otherwise, then checks [`crate::rate_limit::HttpRateLimiter`]
/// keyed by `general_key()` (§9 decision 2).
async fn rate_limit_mw(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, ApiError> {
    let is_agent = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .is_some();
    let session_id = req
        .headers()
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let ticket_token = req
        .headers()
        .get("x-ticket-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let ip = addr.ip().to_string();
    let key = rate_limit::general_key(None, session_id.as_deref(), ticket_token.as_deref(), &ip);
    let class = if is_agent { RateLimitClass::Agent } else { RateLimitClass::Player };
    if !state.rate_limiter().check(&key, class) {
        state.metrics().rate_limit_rejections.inc(&[]);
        return Err(ApiError(cs_core::CsError::RateLimited));
    }
    Ok(next.run(req).await)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = state.cfg().cors_allow_origins.clone();
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state);

    let api = Router::new()
        .route("/auth/login", post(http::auth::login))
        .route("/tickets", post(http::tickets::create_ticket))
        .route("/tickets/by-token/:token", get(http::tickets::get_ticket_by_token))
        .route("/tickets/:ticket_no", get(http::tickets::get_ticket_by_no))
        .route("/sessions", post(http::sessions::create_session))
        .route("/sessions/:session_id", get(http::sessions::get_session))
        .route("/sessions/:session_id/messages", post(http::sessions::player_send_message))
        .route("/sessions/:session_id/transfer", post(http::sessions::transfer_to_agent))
        .route("/sessions/:session_id/close", post(http::sessions::close_by_player))
        .route("/sessions/:session_id/close-by-agent", post(http::sessions::close_by_agent))
        .route("/sessions/:session_id/join", post(http::sessions::join_session))
        .route("/sessions/:session_id/assign", post(http::sessions::assign_session))
        .route("/workbench/queued", get(http::sessions::workbench_queued))
        .route("/messages/send", post(http::messages::agent_send_message))
        .route("/messages/:message_id/translate", post(http::messages::translate_message))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_mw));

    Router::new()
        .route("/v1/ws", get(ws_upgrade))
        .route("/healthz", get(http::ops::healthz))
        .route("/readyz", get(http::ops::readyz))
        .route("/metrics", get(http::ops::metrics))
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(state.clone(), track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
