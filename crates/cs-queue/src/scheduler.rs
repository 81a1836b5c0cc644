//! `QueueScheduler` (§4.5): the public facade over one single-writer actor
//! per game, so two concurrent callers for the same game never race on its
//! queue ordering, while different games scale independently.

use std::sync::{Arc, RwLock};

use cs_core::clock::{Clock, SystemClock};
use cs_core::domain::{Session, User};
use cs_core::ids::{GameId, SessionId, UserId};
use cs_core::{CsError, Result};
use cs_priority::UrgencyRulesSnapshot;
use cs_repo::Repo;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::broadcaster::{NullBroadcaster, QueueBroadcaster};
use crate::partition::{self, AssignmentOutcome, Command, PartitionActor, QueuePosition};

const MAILBOX_CAPACITY: usize = 256;

struct PartitionHandle {
    tx: mpsc::Sender<Command>,
}

pub struct QueueScheduler {
    repo: Arc<dyn Repo>,
    broadcaster: Arc<dyn QueueBroadcaster>,
    clock: Arc<dyn Clock>,
    rules: Arc<RwLock<UrgencyRulesSnapshot>>,
    partitions: DashMap<GameId, PartitionHandle>,
}

impl QueueScheduler {
    pub fn new(repo: Arc<dyn Repo>, broadcaster: Arc<dyn QueueBroadcaster>) -> Self {
        Self::with_clock(repo, broadcaster, Arc::new(SystemClock))
    }

    pub fn with_clock(repo: Arc<dyn Repo>, broadcaster: Arc<dyn QueueBroadcaster>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            broadcaster,
            clock,
            rules: Arc::new(RwLock::new(UrgencyRulesSnapshot::default())),
            partitions: DashMap::new(),
        }
    }

    /// Test/offline convenience: queue mutations with no fan-out attached.
    pub fn without_broadcaster(repo: Arc<dyn Repo>) -> Self {
        Self::new(repo, Arc::new(NullBroadcaster))
    }

    pub fn set_urgency_rules(&self, rules: UrgencyRulesSnapshot) -> Result<()> {
        *self
            .rules
            .write()
            .map_err(|_| CsError::Internal("urgency rules lock poisoned".to_string()))? = rules;
        Ok(())
    }

    /// Lazily spawns the per-game actor on first use. A concurrent racer that
    /// also spawned one loses the `entry` insert; its task's sender is then
    /// dropped, so that orphaned actor observes a closed channel and exits on
    /// its next `recv` — no supervision needed.
    async fn partition(&self, game_id: GameId) -> Result<mpsc::Sender<Command>> {
        if let Some(handle) = self.partitions.get(&game_id) {
            return Ok(handle.tx.clone());
        }

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = PartitionActor::bootstrap(
            game_id,
            self.repo.clone(),
            self.broadcaster.clone(),
            self.clock.clone(),
            self.rules.clone(),
        )
        .await?;
        tokio::spawn(partition::run(actor, rx));

        match self.partitions.entry(game_id) {
            Entry::Occupied(existing) => Ok(existing.get().tx.clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(PartitionHandle { tx: tx.clone() });
                Ok(tx)
            }
        }
    }

    async fn send<T>(&self, game_id: GameId, build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let tx = self.partition(game_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(build(reply_tx))
            .await
            .map_err(|_| CsError::Internal("queue partition actor is gone".to_string()))?;
        reply_rx
            .await
            .map_err(|_| CsError::Internal("queue partition actor dropped the reply".to_string()))?
    }

    pub async fn enqueue(&self, game_id: GameId, session: Session) -> Result<Session> {
        self.send(game_id, |reply| Command::Enqueue { session, reply }).await
    }

    /// Agent-pull model: the agent explicitly requests the next queued
    /// session (§4.5).
    pub async fn dequeue_for(&self, game_id: GameId, agent: User) -> Result<Option<Session>> {
        self.send(game_id, |reply| Command::DequeueFor { agent, reply }).await
    }

    /// Auto-push model: the caller picks a queued session, the scheduler
    /// picks the agent (§4.5).
    pub async fn auto_assign(&self, game_id: GameId, session_id: SessionId) -> Result<AssignmentOutcome> {
        self.send(game_id, |reply| Command::AutoAssign { session_id, reply }).await
    }

    pub async fn assign(&self, game_id: GameId, session_id: SessionId, agent_id: UserId) -> Result<Session> {
        self.send(game_id, |reply| Command::Assign {
            session_id,
            agent_id,
            reply,
        })
        .await
    }

    pub async fn position(&self, game_id: GameId, session_id: SessionId) -> Result<QueuePosition> {
        self.send(game_id, |reply| Command::Position { session_id, reply }).await
    }

    pub async fn cancel(&self, game_id: GameId, session_id: SessionId, reason: String) -> Result<Session> {
        self.send(game_id, |reply| Command::Cancel {
            session_id,
            reason,
            reply,
        })
        .await
    }

    pub async fn rescore(&self, game_id: GameId) -> Result<()> {
        self.send(game_id, |reply| Command::Rescore { reply }).await
    }

    /// Driven by a fixed external tick (default 10s, §4.5); only games with a
    /// live partition actor pay the cost.
    pub async fn rescore_all(&self) -> Result<()> {
        let game_ids: Vec<GameId> = self.partitions.iter().map(|entry| *entry.key()).collect();
        for game_id in game_ids {
            self.rescore(game_id).await?;
        }
        Ok(())
    }

    /// Feeds the partition's rolling `avgServiceTime` median (§4.5); called
    /// by the session engine whenever an `IN_PROGRESS` session closes.
    pub async fn record_service_time(&self, game_id: GameId, duration: std::time::Duration) -> Result<()> {
        let tx = self.partition(game_id).await?;
        tx.send(Command::RecordServiceTime { duration })
            .await
            .map_err(|_| CsError::Internal("queue partition actor is gone".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_core::clock::FixedClock;
    use cs_core::domain::{
        Role, Session, SessionStatus, Ticket, TicketPriority, TicketStatus, User,
    };
    use cs_core::ids::{GameId, SessionId, TicketId, UserId};
    use cs_repo::MemoryRepo;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn ticket(game_id: GameId, priority: TicketPriority) -> Ticket {
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
            priority,
            issue_type_ids: Default::default(),
            attachments: vec![],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn pending_session(ticket_id: TicketId) -> Session {
        Session {
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
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn agent(username: &str, last_login_at: chrono::DateTime<chrono::Utc>) -> User {
        User {
            id: UserId::new(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
            role: Role::Agent,
            real_name: None,
            is_online: true,
            last_login_at: Some(last_login_at),
        }
    }

    async fn seed_ticket(repo: &MemoryRepo, ticket: &Ticket) {
        let mut tx = repo.begin().await.expect("begin");
        tx.insert_ticket(ticket).await.expect("insert ticket");
        tx.commit().await.expect("commit");
    }

    async fn seed_session(repo: &MemoryRepo, session: &Session) {
        let mut tx = repo.begin().await.expect("begin");
        tx.insert_session(session).await.expect("insert session");
        tx.commit().await.expect("commit");
    }

    async fn seed_agent(repo: &MemoryRepo, agent: &User) {
        let mut tx = repo.begin().await.expect("begin");
        tx.insert_user(agent).await.expect("insert agent");
        tx.commit().await.expect("commit");
    }

    #[tokio::test]
    async fn enqueue_scores_and_transitions_to_queued() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, TicketPriority::Urgent);
        seed_ticket(&memory, &t).await;
        let session = pending_session(t.id);
        seed_session(&memory, &session).await;

        let scheduler = QueueScheduler::without_broadcaster(Arc::new(memory));
        let queued = scheduler.enqueue(game_id, session.clone()).await.expect("enqueue");

        assert_eq!(queued.status, SessionStatus::Queued);
        assert_eq!(queued.priority_score, 90.0);
        assert!(queued.queued_at.is_some());
    }

    #[tokio::test]
    async fn enqueue_rejects_a_session_that_is_not_pending() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, TicketPriority::Normal);
        seed_ticket(&memory, &t).await;
        let mut session = pending_session(t.id);
        session.status = SessionStatus::Closed;
        seed_session(&memory, &session).await;

        let scheduler = QueueScheduler::without_broadcaster(Arc::new(memory));
        let err = scheduler.enqueue(game_id, session).await.expect_err("rejected");
        assert_eq!(err.client_code(), cs_core::ClientCode::Conflict);
    }

    #[tokio::test]
    async fn position_ranks_by_score_then_queued_at() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();

        let low_ticket = ticket(game_id, TicketPriority::Low);
        let high_ticket = ticket(game_id, TicketPriority::Urgent);
        seed_ticket(&memory, &low_ticket).await;
        seed_ticket(&memory, &high_ticket).await;

        let low_session = pending_session(low_ticket.id);
        let high_session = pending_session(high_ticket.id);
        seed_session(&memory, &low_session).await;
        seed_session(&memory, &high_session).await;

        let scheduler = QueueScheduler::without_broadcaster(Arc::new(memory));
        scheduler.enqueue(game_id, low_session.clone()).await.expect("enqueue low");
        scheduler
            .enqueue(game_id, high_session.clone())
            .await
            .expect("enqueue high");

        let high_position = scheduler.position(game_id, high_session.id).await.expect("position");
        let low_position = scheduler.position(game_id, low_session.id).await.expect("position");
        assert_eq!(high_position.rank, 1);
        assert_eq!(high_position.ahead, 0);
        assert_eq!(low_position.rank, 2);
        assert_eq!(low_position.ahead, 1);
    }

    #[tokio::test]
    async fn auto_assign_picks_the_least_loaded_online_agent() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, TicketPriority::Normal);
        seed_ticket(&memory, &t).await;
        let session = pending_session(t.id);
        seed_session(&memory, &session).await;

        let earlier = chrono::Utc::now() - chrono::Duration::hours(2);
        let later = chrono::Utc::now() - chrono::Duration::hours(1);
        let idle_agent = agent("idle", later);
        let busy_agent = agent("busy", earlier);
        seed_agent(&memory, &idle_agent).await;
        seed_agent(&memory, &busy_agent).await;

        let busy_ticket = ticket(game_id, TicketPriority::Normal);
        seed_ticket(&memory, &busy_ticket).await;
        let mut busy_session = pending_session(busy_ticket.id);
        busy_session.status = SessionStatus::InProgress;
        busy_session.agent_id = Some(busy_agent.id);
        busy_session.started_at = Some(chrono::Utc::now());
        seed_session(&memory, &busy_session).await;

        let scheduler = QueueScheduler::without_broadcaster(Arc::new(memory));
        scheduler.enqueue(game_id, session.clone()).await.expect("enqueue");

        let outcome = scheduler.auto_assign(game_id, session.id).await.expect("auto_assign");
        match outcome {
            AssignmentOutcome::Assigned(assigned) => assert_eq!(assigned.agent_id, Some(idle_agent.id)),
            AssignmentOutcome::NoAgentAvailable => panic!("expected an agent to be available"),
        }
    }

    #[tokio::test]
    async fn auto_assign_reports_no_agent_available() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, TicketPriority::Normal);
        seed_ticket(&memory, &t).await;
        let session = pending_session(t.id);
        seed_session(&memory, &session).await;

        let scheduler = QueueScheduler::without_broadcaster(Arc::new(memory));
        scheduler.enqueue(game_id, session.clone()).await.expect("enqueue");

        let outcome = scheduler.auto_assign(game_id, session.id).await.expect("auto_assign");
        assert!(matches!(outcome, AssignmentOutcome::NoAgentAvailable));
    }

    #[tokio::test]
    async fn cancel_removes_from_queue_and_closes_the_session() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, TicketPriority::Normal);
        seed_ticket(&memory, &t).await;
        let session = pending_session(t.id);
        seed_session(&memory, &session).await;

        let scheduler = QueueScheduler::without_broadcaster(Arc::new(memory));
        scheduler.enqueue(game_id, session.clone()).await.expect("enqueue");

        let closed = scheduler
            .cancel(game_id, session.id, "player disconnected".to_string())
            .await
            .expect("cancel");
        assert_eq!(closed.status, SessionStatus::Closed);
        assert!(scheduler.position(game_id, session.id).await.is_err());
    }

    #[tokio::test]
    async fn rescore_raises_score_as_queue_time_ages() {
        let memory = MemoryRepo::new();
        let game_id = GameId::new();
        let t = ticket(game_id, TicketPriority::Low);
        seed_ticket(&memory, &t).await;
        let session = pending_session(t.id);
        seed_session(&memory, &session).await;

        let start = chrono::Utc::now();
        let clock = Arc::new(FixedClock::new(start));
        let scheduler = QueueScheduler::with_clock(Arc::new(memory), Arc::new(NullBroadcaster), clock.clone());
        scheduler.enqueue(game_id, session.clone()).await.expect("enqueue");

        clock.advance(chrono::Duration::minutes(15));
        scheduler.rescore(game_id).await.expect("rescore");

        let position = scheduler.position(game_id, session.id).await.expect("position");
        assert_eq!(position.rank, 1);
    }
}
