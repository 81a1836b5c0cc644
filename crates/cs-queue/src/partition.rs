//! The single-writer-per-game mailbox actor (§4.5): every mutation to a
//! game's queued-session index goes through this task's command channel,
//! matching the teacher's single-writer-via-actor discipline for shared
//! realtime state (`RealtimeCore`/`SessionRegistry`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use cs_core::clock::Clock;
use cs_core::domain::{Session, SessionStatus, User};
use cs_core::ids::{GameId, SessionId, UserId};
use cs_core::{CsError, Result};
use cs_priority::UrgencyRulesSnapshot;
use cs_repo::{Pagination, Repo, SessionFilter};
use tokio::sync::{mpsc, oneshot};

use crate::broadcaster::QueueBroadcaster;
use crate::service_time::ServiceTimeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePosition {
    pub rank: u32,
    pub ahead: u32,
    pub eta_minutes: Option<u32>,
}

#[derive(Debug)]
pub enum AssignmentOutcome {
    Assigned(Session),
    NoAgentAvailable,
}

pub(crate) enum Command {
    Enqueue {
        session: Session,
        reply: oneshot::Sender<Result<Session>>,
    },
    DequeueFor {
        agent: User,
        reply: oneshot::Sender<Result<Option<Session>>>,
    },
    AutoAssign {
        session_id: SessionId,
        reply: oneshot::Sender<Result<AssignmentOutcome>>,
    },
    Assign {
        session_id: SessionId,
        agent_id: UserId,
        reply: oneshot::Sender<Result<Session>>,
    },
    Position {
        session_id: SessionId,
        reply: oneshot::Sender<Result<QueuePosition>>,
    },
    Cancel {
        session_id: SessionId,
        reason: String,
        reply: oneshot::Sender<Result<Session>>,
    },
    Rescore {
        reply: oneshot::Sender<Result<()>>,
    },
    RecordServiceTime {
        duration: StdDuration,
    },
}

pub(crate) struct PartitionActor {
    game_id: GameId,
    repo: Arc<dyn Repo>,
    broadcaster: Arc<dyn QueueBroadcaster>,
    clock: Arc<dyn Clock>,
    rules: Arc<RwLock<UrgencyRulesSnapshot>>,
    queued: Vec<Session>,
    last_ranks: HashMap<SessionId, u32>,
    service_time: ServiceTimeTracker,
}

impl PartitionActor {
    /// Rebuilds the in-memory index from storage (§4.5: "on restart rebuild
    /// from storage by replaying `listQueuedSessions`").
    pub(crate) async fn bootstrap(
        game_id: GameId,
        repo: Arc<dyn Repo>,
        broadcaster: Arc<dyn QueueBroadcaster>,
        clock: Arc<dyn Clock>,
        rules: Arc<RwLock<UrgencyRulesSnapshot>>,
    ) -> Result<Self> {
        let queued = repo.list_queued_sessions(Some(game_id)).await?;
        let mut actor = Self {
            game_id,
            repo,
            broadcaster,
            clock,
            rules,
            queued,
            last_ranks: HashMap::new(),
            service_time: ServiceTimeTracker::default(),
        };
        actor.sort_queue();
        actor.last_ranks = actor.current_ranks();
        Ok(actor)
    }

    fn sort_queue(&mut self) {
        self.queued.sort_by_key(cs_priority::ordering_key);
    }

    fn current_ranks(&self) -> HashMap<SessionId, u32> {
        self.queued
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.id, idx as u32 + 1))
            .collect()
    }

    fn rank_of(&self, session_id: SessionId) -> Option<u32> {
        self.queued
            .iter()
            .position(|s| s.id == session_id)
            .map(|idx| idx as u32 + 1)
    }

    fn eta_minutes(&self, ahead: u32) -> Option<u32> {
        if ahead == 0 {
            return Some(0);
        }
        let avg_secs = self.service_time.median().as_secs();
        let total_secs = avg_secs.saturating_mul(u64::from(ahead));
        Some(total_secs.div_ceil(60) as u32)
    }

    async fn score_session(&self, session: &mut Session) -> Result<()> {
        let ticket = self
            .repo
            .find_ticket(session.ticket_id)
            .await?
            .ok_or_else(|| CsError::not_found("ticket for queued session"))?;
        let issue_type_ids: Vec<_> = ticket.issue_type_ids.iter().copied().collect();
        let issue_types = self.repo.get_issue_types(&issue_type_ids).await?;
        let rules = self
            .rules
            .read()
            .map_err(|_| CsError::Internal("urgency rules lock poisoned".to_string()))?
            .clone();
        let now = self.clock.now();
        session.priority_score = cs_priority::score(session, &ticket, &issue_types, &rules, now);
        Ok(())
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        let mut tx = self.repo.begin().await?;
        tx.update_session(session).await?;
        tx.commit().await
    }

    fn remove_from_queue(&mut self, session_id: SessionId) -> Option<Session> {
        let idx = self.queued.iter().position(|s| s.id == session_id)?;
        Some(self.queued.remove(idx))
    }

    async fn handle_enqueue(&mut self, mut session: Session) -> Result<Session> {
        if session.status != SessionStatus::Pending {
            return Err(CsError::conflict("session is not PENDING"));
        }
        let now = self.clock.now();
        session.status = SessionStatus::Queued;
        session.queued_at = Some(now);
        session.updated_at = now;
        self.score_session(&mut session).await?;
        self.persist(&session).await?;

        self.queued.push(session.clone());
        self.sort_queue();

        self.broadcaster.new_session(&session).await;
        if let Some(rank) = self.rank_of(session.id) {
            let ahead = rank - 1;
            self.broadcaster
                .queue_update(session.id, rank, self.eta_minutes(ahead))
                .await;
        }
        self.last_ranks = self.current_ranks();
        Ok(session)
    }

    async fn start_session(&mut self, session_id: SessionId, agent_id: UserId) -> Result<Session> {
        let mut session = self
            .remove_from_queue(session_id)
            .ok_or_else(|| CsError::not_found("session is not queued"))?;
        if !session.status.can_transition_to(SessionStatus::InProgress) {
            return Err(CsError::conflict("session cannot transition to IN_PROGRESS"));
        }
        let now = self.clock.now();
        session.status = SessionStatus::InProgress;
        session.agent_id = Some(agent_id);
        session.started_at = Some(now);
        session.updated_at = now;
        self.persist(&session).await?;
        self.last_ranks = self.current_ranks();
        Ok(session)
    }

    async fn handle_dequeue_for(&mut self, agent: User) -> Result<Option<Session>> {
        let Some(next) = self.queued.first().cloned() else {
            return Ok(None);
        };
        let session = self.start_session(next.id, agent.id).await?;
        Ok(Some(session))
    }

    /// Picks the ONLINE agent with the fewest `IN_PROGRESS` sessions, ties
    /// broken by earliest `lastLoginAt` (§4.5).
    async fn handle_auto_assign(&mut self, session_id: SessionId) -> Result<AssignmentOutcome> {
        let online_agents = self.repo.list_online_agents().await?;
        if online_agents.is_empty() {
            return Ok(AssignmentOutcome::NoAgentAvailable);
        }

        let mut load: HashMap<UserId, usize> = online_agents.iter().map(|a| (a.id, 0)).collect();
        let in_progress = self
            .repo
            .list_sessions(
                &SessionFilter {
                    game_id: Some(self.game_id),
                    status: Some(SessionStatus::InProgress),
                    ..Default::default()
                },
                Pagination::new(0, 10_000),
            )
            .await?;
        for session in &in_progress.items {
            if let Some(agent_id) = session.agent_id {
                if let Some(count) = load.get_mut(&agent_id) {
                    *count += 1;
                }
            }
        }

        let best = online_agents
            .iter()
            .min_by(|a, b| {
                let load_a = load.get(&a.id).copied().unwrap_or(0);
                let load_b = load.get(&b.id).copied().unwrap_or(0);
                load_a
                    .cmp(&load_b)
                    .then_with(|| a.last_login_at.cmp(&b.last_login_at))
            })
            .ok_or_else(|| CsError::Internal("online agent list became empty mid-selection".to_string()))?;

        let session = self.start_session(session_id, best.id).await?;
        Ok(AssignmentOutcome::Assigned(session))
    }

    /// Administrator override (§4.5, §9 decision 1): the target agent need
    /// not be ONLINE.
    async fn handle_assign(&mut self, session_id: SessionId, agent_id: UserId) -> Result<Session> {
        self.start_session(session_id, agent_id).await
    }

    fn handle_position(&self, session_id: SessionId) -> Result<QueuePosition> {
        let rank = self
            .rank_of(session_id)
            .ok_or_else(|| CsError::not_found("session is not queued"))?;
        let ahead = rank - 1;
        Ok(QueuePosition {
            rank,
            ahead,
            eta_minutes: self.eta_minutes(ahead),
        })
    }

    async fn handle_cancel(&mut self, session_id: SessionId, reason: String) -> Result<Session> {
        let mut session = self
            .remove_from_queue(session_id)
            .ok_or_else(|| CsError::not_found("session is not queued"))?;
        if !session.status.can_transition_to(SessionStatus::Closed) {
            return Err(CsError::conflict("session cannot be closed from its current status"));
        }
        let now = self.clock.now();
        session.status = SessionStatus::Closed;
        session.closed_at = Some(now);
        session.updated_at = now;
        session.metadata.insert("cancelReason".to_string(), reason);
        self.persist(&session).await?;
        self.last_ranks = self.current_ranks();
        Ok(session)
    }

    /// Fixed-tick aging pass (default 10s, §4.5): re-scores every queued
    /// session and only pushes `queue-update` for sessions whose rank moved.
    async fn handle_rescore(&mut self) -> Result<()> {
        let mut updated = Vec::with_capacity(self.queued.len());
        for mut session in std::mem::take(&mut self.queued) {
            self.score_session(&mut session).await?;
            updated.push(session);
        }
        self.queued = updated;
        self.sort_queue();

        for session in &self.queued {
            self.persist(session).await?;
        }

        let new_ranks = self.current_ranks();
        for (session_id, rank) in &new_ranks {
            if self.last_ranks.get(session_id) != Some(rank) {
                let ahead = rank - 1;
                self.broadcaster
                    .queue_update(*session_id, *rank, self.eta_minutes(ahead))
                    .await;
            }
        }
        self.last_ranks = new_ranks;
        Ok(())
    }

    fn handle_record_service_time(&mut self, duration: StdDuration) {
        self.service_time.record(duration);
    }
}

pub(crate) async fn run(mut actor: PartitionActor, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Enqueue { session, reply } => {
                let _ = reply.send(actor.handle_enqueue(session).await);
            }
            Command::DequeueFor { agent, reply } => {
                let _ = reply.send(actor.handle_dequeue_for(agent).await);
            }
            Command::AutoAssign { session_id, reply } => {
                let _ = reply.send(actor.handle_auto_assign(session_id).await);
            }
            Command::Assign {
                session_id,
                agent_id,
                reply,
            } => {
                let _ = reply.send(actor.handle_assign(session_id, agent_id).await);
            }
            Command::Position { session_id, reply } => {
                let _ = reply.send(actor.handle_position(session_id));
            }
            Command::Cancel {
                session_id,
                reason,
                reply,
            } => {
                let _ = reply.send(actor.handle_cancel(session_id, reason).await);
            }
            Command::Rescore { reply } => {
                let _ = reply.send(actor.handle_rescore().await);
            }
            Command::RecordServiceTime { duration } => {
                actor.handle_record_service_time(duration);
            }
        }
    }
}
