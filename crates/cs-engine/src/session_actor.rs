//! The single-writer-per-session mailbox actor (§4.6): every mutating
//! operation on one session is serialized through this task's command
//! channel, the same shape `cs-queue`'s per-game partition actor uses, scoped
//! down from a partition key to a single `SessionId`.

use std::collections::BTreeMap;
use std::sync::Arc;

use cs_ai::{AIAdapter, GameCredentials};
use cs_core::clock::Clock;
use cs_core::domain::{
    Message, MessageType, SenderType, Session, SessionStatus, Ticket, TicketMessage, TicketStatus,
};
use cs_core::ids::{MessageId, SessionId, TicketId, TicketMessageId, UserId};
use cs_core::protocol::events::{MessagePayload, PartialFields, ServerEvent};
use cs_core::{CsError, Result};
use cs_queue::{AssignmentOutcome, QueueScheduler};
use cs_repo::Repo;
use tokio::sync::{mpsc, oneshot};

use crate::backoff::retry_transient;
use crate::broadcaster::Broadcaster;
use crate::policy::EnginePolicy;

#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Assigned(Session),
    Queued(cs_queue::QueuePosition),
    ConvertedToTicket { ticket_no: String },
}

#[derive(Debug, Clone, Copy)]
enum ClosedBy {
    Agent,
    Player,
}

pub(crate) enum Command {
    PlayerMessage {
        text: String,
        reply: oneshot::Sender<Result<Message>>,
    },
    AgentMessage {
        agent_id: UserId,
        text: String,
        reply: oneshot::Sender<Result<Message>>,
    },
    TransferToAgent {
        reason: String,
        reply: oneshot::Sender<Result<TransferOutcome>>,
    },
    AgentJoin {
        agent_id: UserId,
        reply: oneshot::Sender<Result<Session>>,
    },
    CloseByAgent {
        reply: oneshot::Sender<Result<Session>>,
    },
    CloseByPlayer {
        reply: oneshot::Sender<Result<Session>>,
    },
    CancelUnassignable {
        reason: String,
        reply: oneshot::Sender<Result<Session>>,
    },
}

fn session_update_fields(session: &Session) -> PartialFields {
    serde_json::json!({
        "status": session.status,
        "agentId": session.agent_id.map(|id| id.to_string()),
        "priorityScore": session.priority_score,
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

fn ticket_update_fields(ticket: &Ticket) -> PartialFields {
    serde_json::json!({ "status": ticket.status })
        .as_object()
        .cloned()
        .unwrap_or_default()
}

pub(crate) struct SessionActor {
    session_id: SessionId,
    repo: Arc<dyn Repo>,
    ai: Arc<dyn AIAdapter>,
    queue: Arc<QueueScheduler>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    policy: EnginePolicy,
}

impl SessionActor {
    pub(crate) fn new(
        session_id: SessionId,
        repo: Arc<dyn Repo>,
        ai: Arc<dyn AIAdapter>,
        queue: Arc<QueueScheduler>,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            session_id,
            repo,
            ai,
            queue,
            broadcaster,
            clock,
            policy,
        }
    }

    async fn fetch_session(&self) -> Result<Session> {
        self.repo
            .find_session(self.session_id)
            .await?
            .ok_or_else(|| CsError::not_found("session"))
    }

    async fn fetch_ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.repo
            .find_ticket(ticket_id)
            .await?
            .ok_or_else(|| CsError::not_found("ticket"))
    }

    async fn persist_session(&self, session: &Session) -> Result<()> {
        let session = session.clone();
        let repo = self.repo.clone();
        retry_transient(|| {
            let session = session.clone();
            let repo = repo.clone();
            async move {
                let mut tx = repo.begin().await?;
                tx.update_session(&session).await?;
                tx.commit().await
            }
        })
        .await
    }

    async fn persist_ticket(&self, ticket: &Ticket) -> Result<()> {
        let ticket = ticket.clone();
        let repo = self.repo.clone();
        retry_transient(|| {
            let ticket = ticket.clone();
            let repo = repo.clone();
            async move {
                let mut tx = repo.begin().await?;
                tx.update_ticket(&ticket).await?;
                tx.commit().await
            }
        })
        .await
    }

    async fn persist_message(&self, message: &Message) -> Result<()> {
        let message = message.clone();
        let repo = self.repo.clone();
        retry_transient(|| {
            let message = message.clone();
            let repo = repo.clone();
            async move {
                let mut tx = repo.begin().await?;
                tx.append_message(&message).await?;
                tx.commit().await
            }
        })
        .await
    }

    async fn persist_ticket_message(&self, message: &TicketMessage) -> Result<()> {
        let message = message.clone();
        let repo = self.repo.clone();
        retry_transient(|| {
            let message = message.clone();
            let repo = repo.clone();
            async move {
                let mut tx = repo.begin().await?;
                tx.append_ticket_message(&message).await?;
                tx.commit().await
            }
        })
        .await
    }

    async fn append_system_message(&self, text: &str) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            session_id: self.session_id,
            sender_type: SenderType::System,
            message_type: MessageType::SystemNotice,
            content: text.to_string(),
            agent_id: None,
            metadata: BTreeMap::new(),
            created_at: self.clock.now(),
        };
        self.persist_message(&message).await?;
        self.broadcaster
            .to_session(
                self.session_id,
                ServerEvent::Message(MessagePayload {
                    session_id: self.session_id,
                    message: message.clone(),
                }),
            )
            .await;
        Ok(message)
    }

    async fn handle_player_message(&self, text: String) -> Result<Message> {
        let mut session = self.fetch_session().await?;
        if session.status == SessionStatus::Closed {
            return Err(CsError::conflict("session is closed"));
        }
        let now = self.clock.now();
        let message = Message {
            id: MessageId::new(),
            session_id: session.id,
            sender_type: SenderType::Player,
            message_type: MessageType::Text,
            content: text.clone(),
            agent_id: None,
            metadata: BTreeMap::new(),
            created_at: now,
        };
        self.persist_message(&message).await?;
        self.broadcaster
            .to_session(
                session.id,
                ServerEvent::Message(MessagePayload {
                    session_id: session.id,
                    message: message.clone(),
                }),
            )
            .await;

        if session.status != SessionStatus::Pending {
            // IN_PROGRESS/QUEUED: an agent or the queue owns the conversation
            // now, no AI involvement on further player messages.
            return Ok(message);
        }

        if session.player_language().is_none() {
            let lang = cs_core::lang::detect_language(&text);
            session.metadata.insert("playerLanguage".to_string(), lang);
            session.updated_at = now;
            self.persist_session(&session).await?;
        }

        let ticket = self.fetch_ticket(session.ticket_id).await?;
        let game = self
            .repo
            .get_game(ticket.game_id)
            .await?
            .ok_or_else(|| CsError::not_found("game"))?;
        let credentials = GameCredentials {
            ciphertext: game.ai_credential_ciphertext.clone(),
            base_url: game.ai_base_url.clone(),
        };
        let user_key = format!("ticket:{}", ticket.id);
        match self
            .ai
            .chat(&text, &credentials, session.ai_conversation_handle.as_deref(), &user_key)
            .await
        {
            Ok(chat) => {
                session.ai_conversation_handle = Some(chat.conversation_handle);
                session.updated_at = self.clock.now();
                self.persist_session(&session).await?;
                let ai_message = Message {
                    id: MessageId::new(),
                    session_id: session.id,
                    sender_type: SenderType::Ai,
                    message_type: MessageType::Text,
                    content: chat.text,
                    agent_id: None,
                    metadata: BTreeMap::new(),
                    created_at: self.clock.now(),
                };
                self.persist_message(&ai_message).await?;
                self.broadcaster
                    .to_session(
                        session.id,
                        ServerEvent::Message(MessagePayload {
                            session_id: session.id,
                            message: ai_message,
                        }),
                    )
                    .await;
            }
            Err(err) => {
                tracing::warn!(%err, session_id = %session.id, "ai chat failed; player message left unanswered");
            }
        }

        Ok(message)
    }

    async fn handle_agent_message(&self, agent_id: UserId, text: String) -> Result<Message> {
        let session = self.fetch_session().await?;
        if session.status != SessionStatus::InProgress || session.agent_id != Some(agent_id) {
            return Err(CsError::Forbidden("agent is not assigned to this session".to_string()));
        }
        let message = Message {
            id: MessageId::new(),
            session_id: session.id,
            sender_type: SenderType::Agent,
            message_type: MessageType::Text,
            content: text,
            agent_id: Some(agent_id),
            metadata: BTreeMap::new(),
            created_at: self.clock.now(),
        };
        self.persist_message(&message).await?;
        self.broadcaster
            .to_session(
                session.id,
                ServerEvent::Message(MessagePayload {
                    session_id: session.id,
                    message: message.clone(),
                }),
            )
            .await;
        Ok(message)
    }

    async fn handle_agent_join(&self, agent_id: UserId) -> Result<Session> {
        let session = self.fetch_session().await?;
        if session.status == SessionStatus::InProgress && session.agent_id == Some(agent_id) {
            return Ok(session);
        }
        let session = match session.status {
            SessionStatus::Queued => {
                let ticket = self.fetch_ticket(session.ticket_id).await?;
                self.queue.assign(ticket.game_id, session.id, agent_id).await?
            }
            SessionStatus::Pending => {
                let now = self.clock.now();
                let mut session = session;
                session.status = SessionStatus::InProgress;
                session.agent_id = Some(agent_id);
                session.started_at = Some(now);
                session.updated_at = now;
                self.persist_session(&session).await?;
                session
            }
            _ => return Err(CsError::conflict("session is not available to join")),
        };

        let agent = self
            .repo
            .find_user_by_id(agent_id)
            .await?
            .ok_or_else(|| CsError::not_found("agent"))?;
        self.append_system_message(&format!("{} joined the conversation", agent.username))
            .await?;

        let mut ticket = self.fetch_ticket(session.ticket_id).await?;
        ticket.status = TicketStatus::InProgress;
        ticket.updated_at = self.clock.now();
        self.persist_ticket(&ticket).await?;

        self.broadcaster
            .to_session(session.id, ServerEvent::SessionUpdate(session_update_fields(&session)))
            .await;
        self.broadcaster
            .to_ticket(ticket.id, ServerEvent::TicketUpdate(ticket_update_fields(&ticket)))
            .await;

        Ok(session)
    }

    /// Either queues the session behind online agents, or — if none are
    /// online at the moment of transfer — converts it into an asynchronous
    /// ticket reply instead (§4.6).
    async fn handle_transfer_to_agent(&self, reason: String) -> Result<TransferOutcome> {
        let mut session = self.fetch_session().await?;
        if session.status != SessionStatus::Pending {
            return Err(CsError::conflict("session is not eligible for transfer"));
        }
        let ticket = self.fetch_ticket(session.ticket_id).await?;
        let online_agents = self.repo.list_online_agents().await?;
        if online_agents.is_empty() {
            return self.convert_to_async_ticket(session, ticket, reason).await;
        }

        let now = self.clock.now();
        session.transfer_at = Some(now);
        session.transfer_reason = Some(reason);
        session.updated_at = now;
        self.persist_session(&session).await?;

        let queued = self.queue.enqueue(ticket.game_id, session).await?;
        self.broadcaster
            .to_session(queued.id, ServerEvent::SessionUpdate(session_update_fields(&queued)))
            .await;

        if self.policy.auto_assign_on_transfer {
            match self.queue.auto_assign(ticket.game_id, queued.id).await? {
                AssignmentOutcome::Assigned(assigned) => {
                    return self.finish_auto_assign(assigned, ticket).await;
                }
                AssignmentOutcome::NoAgentAvailable => {}
            }
        }

        let position = self.queue.position(ticket.game_id, queued.id).await?;
        Ok(TransferOutcome::Queued(position))
    }

    async fn finish_auto_assign(&self, assigned: Session, mut ticket: Ticket) -> Result<TransferOutcome> {
        if let Some(agent_id) = assigned.agent_id {
            let agent = self
                .repo
                .find_user_by_id(agent_id)
                .await?
                .ok_or_else(|| CsError::not_found("agent"))?;
            self.append_system_message(&format!("{} joined the conversation", agent.username))
                .await?;
        }
        ticket.status = TicketStatus::InProgress;
        ticket.updated_at = self.clock.now();
        self.persist_ticket(&ticket).await?;
        self.broadcaster
            .to_session(assigned.id, ServerEvent::SessionUpdate(session_update_fields(&assigned)))
            .await;
        self.broadcaster
            .to_ticket(ticket.id, ServerEvent::TicketUpdate(ticket_update_fields(&ticket)))
            .await;
        Ok(TransferOutcome::Assigned(assigned))
    }

    /// Leaves the session `CLOSED` and the ticket `WAITING` with a system
    /// reply, for either an explicit no-online-agent transfer or a
    /// scheduler-driven `cancel(reason="no_agent")` (§4.5, §4.6).
    async fn convert_to_async_ticket(
        &self,
        mut session: Session,
        mut ticket: Ticket,
        reason: String,
    ) -> Result<TransferOutcome> {
        let now = self.clock.now();
        if session.status != SessionStatus::Closed {
            session.status = SessionStatus::Closed;
            session.closed_at = Some(now);
        }
        session.transfer_at = Some(now);
        session.transfer_reason = Some(reason.clone());
        session.updated_at = now;
        self.persist_session(&session).await?;

        ticket.status = TicketStatus::Waiting;
        ticket.updated_at = now;
        self.persist_ticket(&ticket).await?;

        let ticket_message = TicketMessage {
            id: TicketMessageId::new(),
            ticket_id: ticket.id,
            sender_id: None,
            content: format!(
                "No agent is currently available ({reason}); your message has been saved \
                 and an agent will follow up as soon as possible."
            ),
            metadata: BTreeMap::new(),
            created_at: now,
        };
        self.persist_ticket_message(&ticket_message).await?;

        self.append_system_message("no agent available; converted to an asynchronous ticket")
            .await?;
        self.broadcaster
            .to_session(session.id, ServerEvent::SessionUpdate(session_update_fields(&session)))
            .await;
        self.broadcaster
            .to_ticket(ticket.id, ServerEvent::TicketUpdate(ticket_update_fields(&ticket)))
            .await;
        self.broadcaster
            .to_ticket(ticket.id, ServerEvent::TicketMessage(ticket_message))
            .await;

        Ok(TransferOutcome::ConvertedToTicket {
            ticket_no: ticket.ticket_no,
        })
    }

    async fn handle_cancel_unassignable(&self, reason: String) -> Result<Session> {
        let session = self.fetch_session().await?;
        if !matches!(session.status, SessionStatus::Pending | SessionStatus::Queued) {
            return Err(CsError::conflict("session is not awaiting an agent"));
        }
        let ticket = self.fetch_ticket(session.ticket_id).await?;
        if session.status == SessionStatus::Queued {
            self.queue.cancel(ticket.game_id, session.id, reason.clone()).await?;
        }
        let session = self.fetch_session().await?;
        self.convert_to_async_ticket(session, ticket, reason).await?;
        self.fetch_session().await
    }

    async fn handle_close(&self, closed_by: ClosedBy) -> Result<Session> {
        let session = self.fetch_session().await?;
        if session.status == SessionStatus::Closed {
            return Ok(session);
        }
        if !session.status.can_transition_to(SessionStatus::Closed) {
            return Err(CsError::conflict("session cannot be closed from its current status"));
        }
        let ticket = self.fetch_ticket(session.ticket_id).await?;
        let reason = match closed_by {
            ClosedBy::Agent => "closed_by_agent",
            ClosedBy::Player => "closed_by_player",
        };

        let session = if session.status == SessionStatus::Queued {
            self.queue.cancel(ticket.game_id, session.id, reason.to_string()).await?;
            self.fetch_session().await?
        } else {
            let now = self.clock.now();
            let mut session = session;
            session.status = SessionStatus::Closed;
            session.closed_at = Some(now);
            session.updated_at = now;
            self.persist_session(&session).await?;
            session
        };

        if let (Some(started_at), Some(closed_at)) = (session.started_at, session.closed_at) {
            if let Ok(duration) = (closed_at - started_at).to_std() {
                let _ = self.queue.record_service_time(ticket.game_id, duration).await;
            }
        }

        let mut ticket = ticket;
        ticket.status = match closed_by {
            ClosedBy::Agent => TicketStatus::Resolved,
            ClosedBy::Player => TicketStatus::Waiting,
        };
        ticket.updated_at = self.clock.now();
        self.persist_ticket(&ticket).await?;

        let note = match closed_by {
            ClosedBy::Agent => "session closed by agent",
            ClosedBy::Player => "session closed by player",
        };
        self.append_system_message(note).await?;

        self.broadcaster
            .to_session(session.id, ServerEvent::SessionUpdate(session_update_fields(&session)))
            .await;
        self.broadcaster
            .to_ticket(ticket.id, ServerEvent::TicketUpdate(ticket_update_fields(&ticket)))
            .await;

        Ok(session)
    }
}

pub(crate) async fn run(actor: SessionActor, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::PlayerMessage { text, reply } => {
                let _ = reply.send(actor.handle_player_message(text).await);
            }
            Command::AgentMessage { agent_id, text, reply } => {
                let _ = reply.send(actor.handle_agent_message(agent_id, text).await);
            }
            Command::TransferToAgent { reason, reply } => {
                let _ = reply.send(actor.handle_transfer_to_agent(reason).await);
            }
            Command::AgentJoin { agent_id, reply } => {
                let _ = reply.send(actor.handle_agent_join(agent_id).await);
            }
            Command::CloseByAgent { reply } => {
                let _ = reply.send(actor.handle_close(ClosedBy::Agent).await);
            }
            Command::CloseByPlayer { reply } => {
                let _ = reply.send(actor.handle_close(ClosedBy::Player).await);
            }
            Command::CancelUnassignable { reason, reply } => {
                let _ = reply.send(actor.handle_cancel_unassignable(reason).await);
            }
        }
    }
}
