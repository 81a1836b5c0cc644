//! `SessionEngine` (§4.6): the player/agent-facing session state machine.
//! Mutations on one session are serialized through a lazily-spawned
//! per-session actor (see `session_actor`), mirroring `cs-queue`'s
//! per-game-partition actor but scoped to a single session.

use std::collections::BTreeMap;
use std::sync::Arc;

use cs_ai::AIAdapter;
use cs_core::clock::{Clock, SystemClock};
use cs_core::domain::{Message, Session, SessionStatus, Urgency};
use cs_core::ids::{MessageId, SessionId, TicketId, UserId};
use cs_core::protocol::events::{MessagePayload, ServerEvent};
use cs_core::{CsError, Result};
use cs_queue::QueueScheduler;
use cs_repo::Repo;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::broadcaster::{Broadcaster, QueueBroadcasterAdapter};
use crate::policy::EnginePolicy;
use crate::session_actor::{self, Command, SessionActor, TransferOutcome};

const MAILBOX_CAPACITY: usize = 64;

/// Outcome of `create` (§4.6): a normal conversation left `PENDING`, or — for
/// a direct-transfer issue type — whatever `transferToAgent` produced.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Pending(Session),
    Transferred(TransferOutcome),
}

pub struct SessionEngine {
    repo: Arc<dyn Repo>,
    ai: Arc<dyn AIAdapter>,
    queue: Arc<QueueScheduler>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    policy: EnginePolicy,
    sessions: DashMap<SessionId, mpsc::Sender<Command>>,
}

impl SessionEngine {
    pub fn new(repo: Arc<dyn Repo>, ai: Arc<dyn AIAdapter>, broadcaster: Arc<dyn Broadcaster>) -> Arc<Self> {
        Self::with_clock(repo, ai, broadcaster, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repo: Arc<dyn Repo>,
        ai: Arc<dyn AIAdapter>,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Self::with_policy(repo, ai, broadcaster, clock, EnginePolicy::default())
    }

    pub fn with_policy(
        repo: Arc<dyn Repo>,
        ai: Arc<dyn AIAdapter>,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
        policy: EnginePolicy,
    ) -> Arc<Self> {
        let queue_broadcaster = Arc::new(QueueBroadcasterAdapter(broadcaster.clone()));
        let queue = Arc::new(QueueScheduler::with_clock(repo.clone(), queue_broadcaster, clock.clone()));
        Arc::new(Self {
            repo,
            ai,
            queue,
            broadcaster,
            clock,
            policy,
            sessions: DashMap::new(),
        })
    }

    /// The queue scheduler backing this engine, shared so a background tick
    /// task can drive `rescore_all` (§4.5).
    pub fn queue(&self) -> Arc<QueueScheduler> {
        self.queue.clone()
    }

    fn actor_sender(&self, session_id: SessionId) -> mpsc::Sender<Command> {
        if let Some(existing) = self.sessions.get(&session_id) {
            return existing.clone();
        }
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = SessionActor::new(
            session_id,
            self.repo.clone(),
            self.ai.clone(),
            self.queue.clone(),
            self.broadcaster.clone(),
            self.clock.clone(),
            self.policy,
        );
        tokio::spawn(session_actor::run(actor, rx));

        match self.sessions.entry(session_id) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(vacant) => {
                vacant.insert(tx.clone());
                tx
            }
        }
    }

    async fn send<T>(&self, session_id: SessionId, build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let tx = self.actor_sender(session_id);
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(build(reply_tx))
            .await
            .map_err(|_| CsError::Internal("session actor is gone".to_string()))?;
        reply_rx
            .await
            .map_err(|_| CsError::Internal("session actor dropped the reply".to_string()))?
    }

    /// Frees the per-session mailbox once a session is permanently `CLOSED`;
    /// a later command for the same id spawns a fresh (idle) actor.
    fn evict(&self, session_id: SessionId) {
        self.sessions.remove(&session_id);
    }

    /// Opens a session for a ticket that has none (§4.6). Skips `PENDING`
    /// entirely for an issue type flagged `require_direct_transfer`.
    pub async fn create(&self, ticket_id: TicketId) -> Result<CreateOutcome> {
        if self.repo.find_live_session_for_ticket(ticket_id).await?.is_some() {
            return Err(CsError::conflict("ticket already has a live session"));
        }
        let ticket = self
            .repo
            .find_ticket(ticket_id)
            .await?
            .ok_or_else(|| CsError::not_found("ticket"))?;
        let issue_type_ids: Vec<_> = ticket.issue_type_ids.iter().copied().collect();
        let issue_types = self.repo.get_issue_types(&issue_type_ids).await?;
        let direct_transfer = issue_types.iter().any(|it| it.require_direct_transfer);

        let now = self.clock.now();
        let mut session = Session {
            id: SessionId::new(),
            ticket_id,
            status: SessionStatus::Pending,
            agent_id: None,
            priority_score: 0.0,
            detected_intent: None,
            ai_urgency: None,
            ai_conversation_handle: None,
            allow_manual_transfer: true,
            queued_at: None,
            started_at: None,
            closed_at: None,
            transfer_at: None,
            transfer_reason: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        {
            let mut tx = self.repo.begin().await?;
            tx.insert_session(&session).await?;
            tx.commit().await?;
        }
        self.broadcaster
            .to_session(session.id, ServerEvent::NewSession(session.clone()))
            .await;

        if !direct_transfer {
            let game = self
                .repo
                .get_game(ticket.game_id)
                .await?
                .ok_or_else(|| CsError::not_found("game"))?;
            let credentials = cs_ai::GameCredentials {
                ciphertext: game.ai_credential_ciphertext.clone(),
                base_url: game.ai_base_url.clone(),
            };
            // Synchronous (not fire-and-forget): `triage` carries its own
            // internal deadline and falls back to a safe default, and this
            // keeps the very first mutation of a brand-new session from
            // racing the session actor this call is about to spawn.
            let triage = self.ai.triage(&ticket.description, &credentials).await?;
            session.detected_intent = Some(triage.detected_intent);
            session.ai_urgency = Some(triage.urgency);
            session.ai_conversation_handle = triage.conversation_handle;
            session.updated_at = self.clock.now();
            {
                let mut tx = self.repo.begin().await?;
                tx.update_session(&session).await?;
                tx.commit().await?;
            }

            let message = Message {
                id: MessageId::new(),
                session_id: session.id,
                sender_type: cs_core::domain::SenderType::Ai,
                message_type: cs_core::domain::MessageType::Text,
                content: triage.text,
                agent_id: None,
                metadata: BTreeMap::from([(
                    "suggestedOptions".to_string(),
                    triage.suggested_options.join("|"),
                )]),
                created_at: self.clock.now(),
            };
            {
                let mut tx = self.repo.begin().await?;
                tx.append_message(&message).await?;
                tx.commit().await?;
            }
            self.broadcaster
                .to_session(
                    session.id,
                    ServerEvent::Message(MessagePayload {
                        session_id: session.id,
                        message,
                    }),
                )
                .await;
        }

        // Register the actor before any command (including a direct
        // transfer below) can be sent for this session id.
        self.actor_sender(session.id);

        if direct_transfer {
            let outcome = self.transfer_to_agent(session.id, "direct_transfer_issue_type".to_string()).await?;
            return Ok(CreateOutcome::Transferred(outcome));
        }

        // Conservative auto-escalation: a triage call that came back urgent
        // skips straight to the transfer protocol instead of waiting for the
        // player to ask for a human (§4.6 "detect transfer intent").
        if session.ai_urgency == Some(Urgency::Urgent) {
            let outcome = self.transfer_to_agent(session.id, "ai_detected_urgent".to_string()).await?;
            return Ok(CreateOutcome::Transferred(outcome));
        }

        Ok(CreateOutcome::Pending(session))
    }

    pub async fn player_message(&self, session_id: SessionId, text: String) -> Result<Message> {
        self.send(session_id, |reply| Command::PlayerMessage { text, reply }).await
    }

    pub async fn agent_message(&self, session_id: SessionId, agent_id: UserId, text: String) -> Result<Message> {
        self.send(session_id, |reply| Command::AgentMessage { agent_id, text, reply }).await
    }

    pub async fn transfer_to_agent(&self, session_id: SessionId, reason: String) -> Result<TransferOutcome> {
        self.send(session_id, |reply| Command::TransferToAgent { reason, reply }).await
    }

    pub async fn agent_join(&self, session_id: SessionId, agent_id: UserId) -> Result<Session> {
        self.send(session_id, |reply| Command::AgentJoin { agent_id, reply }).await
    }

    pub async fn close_by_agent(&self, session_id: SessionId) -> Result<Session> {
        let session = self.send(session_id, |reply| Command::CloseByAgent { reply }).await?;
        self.evict(session_id);
        Ok(session)
    }

    pub async fn close_by_player(&self, session_id: SessionId) -> Result<Session> {
        let session = self.send(session_id, |reply| Command::CloseByPlayer { reply }).await?;
        self.evict(session_id);
        Ok(session)
    }

    /// Invoked by a background sweep that finds a `PENDING`/`QUEUED` session
    /// with no agent ever becoming available (§4.5 `scheduler.cancel`).
    pub async fn cancel_unassignable(&self, session_id: SessionId, reason: String) -> Result<Session> {
        let session = self
            .send(session_id, |reply| Command::CancelUnassignable { reason, reply })
            .await?;
        self.evict(session_id);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cs_ai::{ChatResult, GameCredentials, TriageResult};
    use cs_core::domain::{Game, IssueType, Role, Ticket, TicketPriority, TicketStatus, User};
    use cs_core::ids::{GameId, IssueTypeId, TicketId, UserId};
    use cs_repo::MemoryRepo;
    use std::collections::BTreeSet;

    struct StubAiAdapter {
        urgency: Urgency,
    }

    #[async_trait]
    impl AIAdapter for StubAiAdapter {
        async fn triage(&self, _description: &str, _credentials: &GameCredentials) -> Result<TriageResult> {
            Ok(TriageResult {
                text: "we're looking into it".to_string(),
                suggested_options: vec!["talk to an agent".to_string()],
                detected_intent: "billing".to_string(),
                urgency: self.urgency,
                conversation_handle: Some("conv-1".to_string()),
            })
        }

        async fn chat(
            &self,
            query: &str,
            _credentials: &GameCredentials,
            conversation_handle: Option<&str>,
            _user_key: &str,
        ) -> Result<ChatResult> {
            Ok(ChatResult {
                text: format!("ai reply to: {query}"),
                conversation_handle: conversation_handle.unwrap_or("conv-1").to_string(),
            })
        }

        async fn optimize(&self, draft: &str, _context: &str, _credentials: &GameCredentials) -> String {
            draft.to_string()
        }
    }

    fn game(id: GameId) -> Game {
        Game {
            id,
            name: "Demo".to_string(),
            enabled: true,
            ai_credential_ciphertext: "unused-in-tests".to_string(),
            ai_base_url: "https://example.invalid".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn ticket(game_id: GameId, issue_type_ids: BTreeSet<IssueTypeId>) -> Ticket {
        Ticket {
            id: TicketId::new(),
            ticket_no: format!("G-{}", uuid::Uuid::new_v4()),
            token: uuid::Uuid::new_v4().to_string(),
            game_id,
            server_id: None,
            server_name: None,
            player_id_or_name: "player1".to_string(),
            description: "cannot log in".to_string(),
            occurred_at: None,
            payment_order_no: None,
            status: TicketStatus::New,
            priority: TicketPriority::Normal,
            issue_type_ids,
            attachments: vec![],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn issue_type(game_id: GameId, require_direct_transfer: bool) -> IssueType {
        IssueType {
            id: IssueTypeId::new(),
            game_id,
            name: "Billing".to_string(),
            priority_weight: 50,
            require_direct_transfer,
            enabled: true,
            sort_order: 0,
        }
    }

    fn agent(username: &str) -> User {
        User {
            id: UserId::new(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
            role: Role::Agent,
            real_name: None,
            is_online: true,
            last_login_at: Some(chrono::Utc::now()),
        }
    }

    async fn seed(repo: &MemoryRepo, game: &Game, ticket: &Ticket, issue_types: &[IssueType]) {
        let mut tx = repo.begin().await.expect("begin");
        tx.insert_game(game).await.expect("insert game");
        tx.insert_ticket(ticket).await.expect("insert ticket");
        for it in issue_types {
            tx.insert_issue_type(it).await.expect("insert issue type");
        }
        tx.commit().await.expect("commit");
    }

    fn engine_with(memory: MemoryRepo, urgency: Urgency) -> Arc<SessionEngine> {
        SessionEngine::new(
            Arc::new(memory),
            Arc::new(StubAiAdapter { urgency }),
            Arc::new(crate::broadcaster::NullBroadcaster),
        )
    }

    #[tokio::test]
    async fn create_leaves_a_non_urgent_session_pending_with_ai_triage_applied() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, BTreeSet::new());
        seed(&memory, &game(game_id), &t, &[]).await;

        let engine = engine_with(memory, Urgency::NonUrgent);
        let outcome = engine.create(t.id).await.expect("create");
        match outcome {
            CreateOutcome::Pending(session) => {
                assert_eq!(session.status, SessionStatus::Pending);
                assert_eq!(session.detected_intent.as_deref(), Some("billing"));
                assert_eq!(session.ai_urgency, Some(Urgency::NonUrgent));
            }
            CreateOutcome::Transferred(_) => panic!("expected a pending session"),
        }
    }

    #[tokio::test]
    async fn create_rejects_a_ticket_that_already_has_a_live_session() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, BTreeSet::new());
        seed(&memory, &game(game_id), &t, &[]).await;

        let engine = engine_with(memory, Urgency::NonUrgent);
        engine.create(t.id).await.expect("first create");
        let err = engine.create(t.id).await.expect_err("second create rejected");
        assert_eq!(err.client_code(), cs_core::ClientCode::Conflict);
    }

    #[tokio::test]
    async fn direct_transfer_issue_type_skips_pending_and_converts_to_ticket_when_no_agent_online() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let it = issue_type(game_id, true);
        let mut issue_type_ids = BTreeSet::new();
        issue_type_ids.insert(it.id);
        let t = ticket(game_id, issue_type_ids);
        seed(&memory, &game(game_id), &t, &[it]).await;

        let engine = engine_with(memory, Urgency::NonUrgent);
        let outcome = engine.create(t.id).await.expect("create");
        match outcome {
            CreateOutcome::Transferred(TransferOutcome::ConvertedToTicket { .. }) => {}
            other => panic!("expected a converted-to-ticket transfer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ai_detected_urgency_auto_transfers_to_an_online_agent() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, BTreeSet::new());
        seed(&memory, &game(game_id), &t, &[]).await;
        {
            let mut tx = memory.begin().await.expect("begin");
            tx.insert_user(&agent("agent1")).await.expect("insert agent");
            tx.commit().await.expect("commit");
        }

        let engine = engine_with(memory, Urgency::Urgent);
        let outcome = engine.create(t.id).await.expect("create");
        match outcome {
            CreateOutcome::Transferred(TransferOutcome::Assigned(session)) => {
                assert_eq!(session.status, SessionStatus::InProgress);
            }
            other => panic!("expected an assigned transfer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn player_message_while_pending_gets_an_ai_reply() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, BTreeSet::new());
        seed(&memory, &game(game_id), &t, &[]).await;

        let engine = engine_with(memory, Urgency::NonUrgent);
        let session = match engine.create(t.id).await.expect("create") {
            CreateOutcome::Pending(session) => session,
            CreateOutcome::Transferred(_) => panic!("expected pending"),
        };

        let message = engine
            .player_message(session.id, "still broken".to_string())
            .await
            .expect("player message");
        assert_eq!(message.content, "still broken");
    }

    #[tokio::test]
    async fn agent_join_transitions_pending_to_in_progress_and_ticket_to_in_progress() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, BTreeSet::new());
        seed(&memory, &game(game_id), &t, &[]).await;
        let a = agent("agent1");
        {
            let mut tx = memory.begin().await.expect("begin");
            tx.insert_user(&a).await.expect("insert agent");
            tx.commit().await.expect("commit");
        }

        let engine = engine_with(memory.clone(), Urgency::NonUrgent);
        let session = match engine.create(t.id).await.expect("create") {
            CreateOutcome::Pending(session) => session,
            CreateOutcome::Transferred(_) => panic!("expected pending"),
        };

        let joined = engine.agent_join(session.id, a.id).await.expect("agent join");
        assert_eq!(joined.status, SessionStatus::InProgress);
        assert_eq!(joined.agent_id, Some(a.id));

        let ticket = memory.find_ticket(t.id).await.expect("query").expect("present");
        assert_eq!(ticket.status, TicketStatus::InProgress);
    }

    #[tokio::test]
    async fn agent_join_twice_by_the_same_agent_is_idempotent() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, BTreeSet::new());
        seed(&memory, &game(game_id), &t, &[]).await;
        let a = agent("agent1");
        {
            let mut tx = memory.begin().await.expect("begin");
            tx.insert_user(&a).await.expect("insert agent");
            tx.commit().await.expect("commit");
        }

        let engine = engine_with(memory.clone(), Urgency::NonUrgent);
        let session = match engine.create(t.id).await.expect("create") {
            CreateOutcome::Pending(session) => session,
            CreateOutcome::Transferred(_) => panic!("expected pending"),
        };

        let first = engine.agent_join(session.id, a.id).await.expect("first join");
        let second = engine.agent_join(session.id, a.id).await.expect("second join");
        assert_eq!(first.status, second.status);
        assert_eq!(first.agent_id, second.agent_id);
        assert_eq!(first.updated_at, second.updated_at);

        let messages = memory.list_messages(session.id).await.expect("list messages");
        let join_notices = messages.iter().filter(|m| m.content.contains("joined the conversation")).count();
        assert_eq!(join_notices, 1);
    }

    #[tokio::test]
    async fn close_by_player_sets_ticket_waiting_close_by_agent_sets_resolved() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();

        let t1 = ticket(game_id, BTreeSet::new());
        let t2 = ticket(game_id, BTreeSet::new());
        seed(&memory, &game(game_id), &t1, &[]).await;
        seed(&memory, &game(game_id), &t2, &[]).await;

        let engine = engine_with(memory.clone(), Urgency::NonUrgent);

        let s1 = match engine.create(t1.id).await.expect("create") {
            CreateOutcome::Pending(session) => session,
            CreateOutcome::Transferred(_) => panic!("expected pending"),
        };
        engine.close_by_player(s1.id).await.expect("close by player");
        let ticket1 = memory.find_ticket(t1.id).await.expect("query").expect("present");
        assert_eq!(ticket1.status, TicketStatus::Waiting);

        let s2 = match engine.create(t2.id).await.expect("create") {
            CreateOutcome::Pending(session) => session,
            CreateOutcome::Transferred(_) => panic!("expected pending"),
        };
        engine.close_by_agent(s2.id).await.expect("close by agent");
        let ticket2 = memory.find_ticket(t2.id).await.expect("query").expect("present");
        assert_eq!(ticket2.status, TicketStatus::Resolved);
    }

    #[tokio::test]
    async fn close_by_player_twice_is_a_no_op_on_the_second_call() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, BTreeSet::new());
        seed(&memory, &game(game_id), &t, &[]).await;

        let engine = engine_with(memory.clone(), Urgency::NonUrgent);
        let session = match engine.create(t.id).await.expect("create") {
            CreateOutcome::Pending(session) => session,
            CreateOutcome::Transferred(_) => panic!("expected pending"),
        };

        let first = engine.close_by_player(session.id).await.expect("first close");
        let second = engine.close_by_player(session.id).await.expect("second close");
        assert_eq!(first.status, SessionStatus::Closed);
        assert_eq!(second.status, SessionStatus::Closed);
        assert_eq!(first.closed_at, second.closed_at);
    }
}
