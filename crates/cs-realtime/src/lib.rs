//! The authenticated WebSocket hub (§4.7): connection lifecycle, rooms,
//! rate limiting, and broadcast fan-out. Implements [`cs_engine::Broadcaster`]
//! so `cs-engine` never has to know this crate, or `axum`, exists.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod auth;
mod config;
mod connection;
mod hub;
mod presence;
mod rate_limit;
mod registry;

pub use auth::{authenticate, AuthError, ConnectionIdentity, ConnectionRole};
pub use config::RealtimeConfig;
pub use hub::RealtimeHub;
pub use presence::{PresenceIndex, Room};
pub use rate_limit::TokenBucket;
pub use registry::{Connection, ConnectionId, ConnectionRegistry};

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::SinkExt;

/// Resolves the handshake token against `hub`'s repo and either starts the
/// connection's driving loop or closes with the close code named in §4.7
/// (4001 invalid/expired token, 4003 role not permitted).
pub async fn handle_connection(hub: Arc<RealtimeHub>, token: String, mut socket: WebSocket) {
    let identity = match authenticate(hub.repo.as_ref(), &hub.config.jwt_secret, &token).await {
        Ok(identity) => identity,
        Err(err) => {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: err.close_code(),
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        }
    };
    connection::run(hub, identity, socket).await;
}
