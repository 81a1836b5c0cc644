//! Per-connection driving loop, grounded on the teacher's
//! `wsprism-gateway/src/transport/ws.rs::run_session`: a writer task draining
//! a bounded `mpsc` onto the socket, a `select!` over inbound frames/ping
//! tick/idle timeout, decode-once, and (new here) per-connection token-bucket
//! rate limiting and typed client-event dispatch with acks (§4.7).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use cs_core::ids::UserId;
use cs_core::protocol::events::{ClientEvent, ErrorPayload, ServerEvent, WsAck};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::auth::{ConnectionIdentity, ConnectionRole};
use crate::hub::RealtimeHub;
use crate::presence::Room;
use crate::rate_limit::TokenBucket;
use crate::registry::{Connection, ConnectionId};

const OUTBOUND_CAPACITY: usize = 1024;

fn ack_message(ack: &WsAck) -> Message {
    Message::Text(serde_json::to_string(ack).unwrap_or_else(|_| "{}".to_string()))
}

pub async fn run(hub: Arc<RealtimeHub>, identity: ConnectionIdentity, socket: WebSocket) {
    let conn_id = ConnectionId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    hub.register(
        conn_id,
        Connection {
            tx: out_tx.clone(),
            identity: identity.clone(),
        },
    )
    .await;

    let mut bucket = match identity.role {
        ConnectionRole::Player => TokenBucket::new(hub.config.player_rate_per_minute, hub.config.player_rate_burst),
        ConnectionRole::Agent | ConnectionRole::Admin => {
            TokenBucket::new(hub.config.agent_rate_per_minute, hub.config.agent_rate_burst)
        }
    };
    let mut last_rate_notice: Option<Instant> = None;

    let ping_interval = Duration::from_millis(hub.config.ping_interval_ms);
    let idle_timeout = Duration::from_millis(hub.config.idle_timeout_ms);
    let mut last_rx = Instant::now();
    let mut ping_tick = tokio::time::interval(ping_interval);

    loop {
        tokio::select! {
            _ = ping_tick.tick() => {
                let _ = out_tx.try_send(Message::Ping(Vec::new()));
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Ping(v))) => {
                        last_rx = Instant::now();
                        let _ = out_tx.try_send(Message::Pong(v));
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_rx = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        last_rx = Instant::now();

                        if !bucket.try_take_one() {
                            let now = Instant::now();
                            let cooldown_elapsed = last_rate_notice
                                .map(|t| now.duration_since(t) >= Duration::from_millis(hub.config.rate_limit_notice_cooldown_ms))
                                .unwrap_or(true);
                            if cooldown_elapsed {
                                last_rate_notice = Some(now);
                                let notice = ServerEvent::Error(ErrorPayload::rate_limited(None));
                                if let Ok(encoded) = serde_json::to_string(&notice) {
                                    let _ = out_tx.try_send(Message::Text(encoded));
                                }
                            }
                            continue;
                        }

                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                let ack = dispatch(&hub, conn_id, &identity, event).await;
                                let _ = out_tx.send(ack_message(&ack)).await;
                            }
                            Err(err) => {
                                tracing::warn!(%err, "failed to decode client event");
                                let _ = out_tx.send(Message::Text(
                                    serde_json::to_string(&WsAck::failed("invalid event")).unwrap_or_default(),
                                )).await;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        // No binary lane in this protocol (§9) — ignore.
                    }
                    Some(Err(_)) | None => break,
                }
            }

            _ = tokio::time::sleep_until(last_rx + idle_timeout) => {
                tracing::info!(conn = ?conn_id, "idle timeout; closing");
                let _ = out_tx.send(Message::Close(Some(CloseFrame {
                    code: 4000,
                    reason: "idle timeout".into(),
                }))).await;
                break;
            }
        }
    }

    writer.abort();
    hub.disconnect(conn_id);
}

async fn dispatch(hub: &Arc<RealtimeHub>, conn_id: ConnectionId, identity: &ConnectionIdentity, event: ClientEvent) -> WsAck {
    match event {
        ClientEvent::Ping => {
            if let Some(conn) = hub.registry().get(conn_id) {
                let _ = conn.tx.try_send(Message::Text(
                    serde_json::to_string(&ServerEvent::Pong).unwrap_or_default(),
                ));
            }
            WsAck::ok()
        }
        ClientEvent::JoinSession { session_id } => {
            let room = Room::Session(session_id);
            match hub.authorize_join(identity, &room).await {
                Ok(true) => {
                    hub.presence().join(&room, conn_id);
                    WsAck::ok()
                }
                Ok(false) => WsAck::failed("not a participant of this session"),
                Err(err) => WsAck::failed(err.to_string()),
            }
        }
        ClientEvent::LeaveSession { session_id } => {
            hub.presence().leave(&Room::Session(session_id), conn_id);
            WsAck::ok()
        }
        ClientEvent::JoinTicket { ticket_id } => {
            let room = Room::Ticket(ticket_id);
            match hub.authorize_join(identity, &room).await {
                Ok(true) => {
                    hub.presence().join(&room, conn_id);
                    WsAck::ok()
                }
                Ok(false) => WsAck::failed("not a participant of this ticket"),
                Err(err) => WsAck::failed(err.to_string()),
            }
        }
        ClientEvent::AgentSendMessage { session_id, content, temp_id: _ } => {
            let Some(agent_id) = identity.user_id else {
                return WsAck::failed("only an authenticated agent may send on this channel");
            };
            match send_agent_message(hub, session_id, agent_id, content).await {
                Ok(message_id) => WsAck::ok_with_message_id(message_id),
                Err(err) => WsAck::failed(err.to_string()),
            }
        }
    }
}

async fn send_agent_message(
    hub: &Arc<RealtimeHub>,
    session_id: cs_core::ids::SessionId,
    agent_id: UserId,
    content: String,
) -> cs_core::Result<String> {
    let engine = hub.engine()?;
    let message = engine.agent_message(session_id, agent_id, content).await?;
    Ok(message.id.to_string())
}
