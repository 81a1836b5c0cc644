//! In-memory `Repo` double (§"Test tooling"): a mutex-guarded set of maps so
//! `cs-priority`/`cs-queue`/`cs-engine` unit tests never need a live Postgres
//! instance. `begin()` clones the relevant maps into the transaction and
//! swaps them back on `commit`, approximating the Postgres implementation's
//! `sqlx::Transaction` isolation without an actual lock-held-across-await.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cs_core::domain::{
    Game, IssueType, Message, QuickReply, QuickReplyCategory, SatisfactionRating, Server,
    Session, Ticket, TicketMessage, User,
};
use cs_core::ids::{
    GameId, IssueTypeId, QuickReplyCategoryId, ServerId, SessionId, TicketId, UserId,
};
use cs_core::{CsError, Result};

use crate::repo::{Page, Pagination, Repo, RepoTx, SessionFilter, TicketFilter};

#[derive(Default, Clone)]
struct Tables {
    games: BTreeMap<GameId, Game>,
    servers: BTreeMap<ServerId, Server>,
    issue_types: BTreeMap<IssueTypeId, IssueType>,
    users: BTreeMap<UserId, User>,
    tickets: BTreeMap<TicketId, Ticket>,
    sessions: BTreeMap<SessionId, Session>,
    messages: Vec<Message>,
    ticket_messages: Vec<TicketMessage>,
    quick_reply_categories: BTreeMap<QuickReplyCategoryId, QuickReplyCategory>,
    quick_replies: BTreeMap<cs_core::ids::QuickReplyId, QuickReply>,
    satisfaction_ratings: BTreeMap<SessionId, SatisfactionRating>,
}

#[derive(Clone, Default)]
pub struct MemoryRepo {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        #[allow(clippy::unwrap_used)]
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Repo for MemoryRepo {
    async fn begin(&self) -> Result<Box<dyn RepoTx>> {
        let snapshot = self.lock().clone();
        Ok(Box::new(MemoryTx {
            tables: self.tables.clone(),
            staged: snapshot,
        }))
    }

    async fn get_game(&self, id: GameId) -> Result<Option<Game>> {
        Ok(self.lock().games.get(&id).cloned())
    }

    async fn list_games(&self) -> Result<Vec<Game>> {
        Ok(self.lock().games.values().cloned().collect())
    }

    async fn get_server(&self, id: ServerId) -> Result<Option<Server>> {
        Ok(self.lock().servers.get(&id).cloned())
    }

    async fn list_servers(&self, game_id: GameId) -> Result<Vec<Server>> {
        Ok(self
            .lock()
            .servers
            .values()
            .filter(|s| s.game_id == game_id)
            .cloned()
            .collect())
    }

    async fn list_issue_types(&self, game_id: GameId) -> Result<Vec<IssueType>> {
        Ok(self
            .lock()
            .issue_types
            .values()
            .filter(|it| it.game_id == game_id)
            .cloned()
            .collect())
    }

    async fn get_issue_types(&self, ids: &[IssueTypeId]) -> Result<Vec<IssueType>> {
        let tables = self.lock();
        Ok(ids.iter().filter_map(|id| tables.issue_types.get(id).cloned()).collect())
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.lock().users.values().find(|u| u.username == username).cloned())
    }

    async fn list_online_agents(&self) -> Result<Vec<User>> {
        Ok(self.lock().users.values().filter(|u| u.is_online).cloned().collect())
    }

    async fn find_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        Ok(self.lock().tickets.get(&id).cloned())
    }

    async fn find_ticket_by_token(&self, token: &str) -> Result<Option<Ticket>> {
        Ok(self.lock().tickets.values().find(|t| t.token == token).cloned())
    }

    async fn find_ticket_by_no(&self, ticket_no: &str) -> Result<Option<Ticket>> {
        Ok(self.lock().tickets.values().find(|t| t.ticket_no == ticket_no).cloned())
    }

    async fn find_open_ticket(
        &self,
        game_id: GameId,
        server_key: &str,
        player_id_or_name: &str,
        issue_type_id: IssueTypeId,
    ) -> Result<Option<Ticket>> {
        Ok(self
            .lock()
            .tickets
            .values()
            .find(|t| {
                t.game_id == game_id
                    && t.server_key() == server_key
                    && t.player_id_or_name == player_id_or_name
                    && t.issue_type_ids.contains(&issue_type_id)
                    && !t.status.is_terminal()
            })
            .cloned())
    }

    async fn search_tickets(&self, filter: &TicketFilter, page: Pagination) -> Result<Page<Ticket>> {
        let tables = self.lock();
        let mut matched: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| filter.game_id.is_none_or(|g| t.game_id == g))
            .filter(|t| filter.server_id.is_none_or(|s| t.server_id == Some(s)))
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.priority.is_none_or(|p| t.priority == p))
            .filter(|t| {
                filter
                    .issue_type_id
                    .is_none_or(|id| t.issue_type_ids.contains(&id))
            })
            .filter(|t| {
                filter
                    .player_id_or_name
                    .as_deref()
                    .is_none_or(|p| t.player_id_or_name == p)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(Page { items, total })
    }

    async fn find_session(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.lock().sessions.get(&id).cloned())
    }

    async fn find_live_session_for_ticket(&self, ticket_id: TicketId) -> Result<Option<Session>> {
        Ok(self
            .lock()
            .sessions
            .values()
            .find(|s| s.ticket_id == ticket_id && s.status.is_live())
            .cloned())
    }

    async fn list_queued_sessions(&self, game_id: Option<GameId>) -> Result<Vec<Session>> {
        let tables = self.lock();
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.status == cs_core::domain::SessionStatus::Queued)
            .filter(|s| match game_id {
                None => true,
                Some(g) => tables.tickets.get(&s.ticket_id).map(|t| t.game_id) == Some(g),
            })
            .cloned()
            .collect())
    }

    async fn list_sessions(&self, filter: &SessionFilter, page: Pagination) -> Result<Page<Session>> {
        let tables = self.lock();
        let mut matched: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| filter.status.is_none_or(|st| s.status == st))
            .filter(|s| filter.agent_id.is_none_or(|a| s.agent_id == Some(a)))
            .filter(|s| {
                filter
                    .game_id
                    .is_none_or(|g| tables.tickets.get(&s.ticket_id).map(|t| t.game_id) == Some(g))
            })
            .filter(|s| filter.created_after.is_none_or(|since| s.created_at >= since))
            .filter(|s| filter.created_before.is_none_or(|until| s.created_at <= until))
            .cloned()
            .collect();
        matched.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(Page { items, total })
    }

    async fn list_messages(&self, session_id: SessionId) -> Result<Vec<Message>> {
        let tables = self.lock();
        let mut out: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }

    async fn find_message(&self, id: cs_core::ids::MessageId) -> Result<Option<Message>> {
        Ok(self.lock().messages.iter().find(|m| m.id == id).cloned())
    }

    async fn list_ticket_messages(&self, ticket_id: TicketId) -> Result<Vec<TicketMessage>> {
        let tables = self.lock();
        let mut out: Vec<TicketMessage> = tables
            .ticket_messages
            .iter()
            .filter(|m| m.ticket_id == ticket_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }

    async fn list_quick_reply_categories(&self) -> Result<Vec<QuickReplyCategory>> {
        Ok(self
            .lock()
            .quick_reply_categories
            .values()
            .filter(|c| c.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn list_quick_replies(&self, category_id: Option<QuickReplyCategoryId>) -> Result<Vec<QuickReply>> {
        Ok(self
            .lock()
            .quick_replies
            .values()
            .filter(|q| q.deleted_at.is_none())
            .filter(|q| category_id.is_none() || q.category_id == category_id)
            .cloned()
            .collect())
    }

    async fn get_satisfaction_rating(&self, session_id: SessionId) -> Result<Option<SatisfactionRating>> {
        Ok(self.lock().satisfaction_ratings.get(&session_id).cloned())
    }
}

/// Staged mutations applied to the shared map set only on `commit`.
struct MemoryTx {
    tables: Arc<Mutex<Tables>>,
    staged: Tables,
}

#[async_trait]
impl RepoTx for MemoryTx {
    async fn insert_game(&mut self, game: &Game) -> Result<()> {
        if self.staged.games.contains_key(&game.id) {
            return Err(CsError::conflict("game already exists"));
        }
        self.staged.games.insert(game.id, game.clone());
        Ok(())
    }

    async fn update_game(&mut self, game: &Game) -> Result<()> {
        if !self.staged.games.contains_key(&game.id) {
            return Err(CsError::not_found("game"));
        }
        self.staged.games.insert(game.id, game.clone());
        Ok(())
    }

    async fn insert_server(&mut self, server: &Server) -> Result<()> {
        self.staged.servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn insert_issue_type(&mut self, issue_type: &IssueType) -> Result<()> {
        self.staged.issue_types.insert(issue_type.id, issue_type.clone());
        Ok(())
    }

    async fn update_issue_type(&mut self, issue_type: &IssueType) -> Result<()> {
        if !self.staged.issue_types.contains_key(&issue_type.id) {
            return Err(CsError::not_found("issue_type"));
        }
        self.staged.issue_types.insert(issue_type.id, issue_type.clone());
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> Result<()> {
        if self.staged.users.values().any(|u| u.username == user.username) {
            return Err(CsError::conflict("username already taken"));
        }
        self.staged.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> Result<()> {
        if !self.staged.users.contains_key(&user.id) {
            return Err(CsError::not_found("user"));
        }
        self.staged.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        if self.staged.tickets.contains_key(&ticket.id) {
            return Err(CsError::conflict("ticket already exists"));
        }
        if self
            .staged
            .tickets
            .values()
            .any(|t| t.ticket_no == ticket.ticket_no || t.token == ticket.token)
        {
            return Err(CsError::conflict("ticket_no/token already in use"));
        }
        self.staged.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        if !self.staged.tickets.contains_key(&ticket.id) {
            return Err(CsError::not_found("ticket"));
        }
        self.staged.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn insert_session(&mut self, session: &Session) -> Result<()> {
        if self.staged.sessions.contains_key(&session.id) {
            return Err(CsError::conflict("session already exists"));
        }
        let has_live_sibling = self
            .staged
            .sessions
            .values()
            .any(|s| s.ticket_id == session.ticket_id && s.status.is_live());
        if has_live_sibling && session.status.is_live() {
            return Err(CsError::conflict("ticket already has a live session"));
        }
        self.staged.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_session(&mut self, session: &Session) -> Result<()> {
        let Some(previous) = self.staged.sessions.get(&session.id) else {
            return Err(CsError::not_found("session"));
        };
        if previous.status != session.status && !previous.status.can_transition_to(session.status) {
            return Err(CsError::conflict(format!(
                "illegal session transition {:?} -> {:?}",
                previous.status, session.status
            )));
        }
        if !session.satisfies_agent_invariant() {
            return Err(CsError::conflict("agentId must be set iff status = IN_PROGRESS"));
        }
        self.staged.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn append_message(&mut self, message: &Message) -> Result<()> {
        self.staged.messages.push(message.clone());
        Ok(())
    }

    async fn update_message_metadata(&mut self, message: &Message) -> Result<()> {
        let Some(existing) = self.staged.messages.iter_mut().find(|m| m.id == message.id) else {
            return Err(CsError::not_found("message"));
        };
        existing.metadata = message.metadata.clone();
        Ok(())
    }

    async fn append_ticket_message(&mut self, message: &TicketMessage) -> Result<()> {
        self.staged.ticket_messages.push(message.clone());
        Ok(())
    }

    async fn insert_quick_reply_category(&mut self, category: &QuickReplyCategory) -> Result<()> {
        self.staged.quick_reply_categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn insert_quick_reply(&mut self, quick_reply: &QuickReply) -> Result<()> {
        self.staged.quick_replies.insert(quick_reply.id, quick_reply.clone());
        Ok(())
    }

    async fn update_quick_reply(&mut self, quick_reply: &QuickReply) -> Result<()> {
        if !self.staged.quick_replies.contains_key(&quick_reply.id) {
            return Err(CsError::not_found("quick_reply"));
        }
        self.staged.quick_replies.insert(quick_reply.id, quick_reply.clone());
        Ok(())
    }

    async fn upsert_satisfaction_rating(&mut self, rating: &SatisfactionRating) -> Result<()> {
        if !SatisfactionRating::is_valid_rating(rating.rating) {
            return Err(CsError::validation("rating must be 1..=5"));
        }
        self.staged.satisfaction_ratings.insert(rating.session_id, rating.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *tables = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_core::domain::{SessionStatus, TicketPriority, TicketStatus};
    use cs_core::ids::TicketId;
    use std::collections::BTreeSet;

    fn ticket() -> Ticket {
        Ticket {
            id: TicketId::new(),
            ticket_no: "G1-20260727-001".to_string(),
            token: "tok-1".to_string(),
            game_id: GameId::new(),
            server_id: None,
            server_name: None,
            player_id_or_name: "player1".to_string(),
            description: "desc".to_string(),
            occurred_at: None,
            payment_order_no: None,
            status: TicketStatus::New,
            priority: TicketPriority::Normal,
            issue_type_ids: BTreeSet::new(),
            attachments: vec![],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_find_ticket_round_trips() {
        let repo = MemoryRepo::new();
        let t = ticket();
        let mut tx = repo.begin().await.expect("begin");
        tx.insert_ticket(&t).await.expect("insert");
        tx.commit().await.expect("commit");

        let found = repo.find_ticket(t.id).await.expect("query").expect("present");
        assert_eq!(found.ticket_no, t.ticket_no);
    }

    #[tokio::test]
    async fn rollback_never_touches_shared_state() {
        let repo = MemoryRepo::new();
        let t = ticket();
        let mut tx = repo.begin().await.expect("begin");
        tx.insert_ticket(&t).await.expect("insert");
        tx.rollback().await.expect("rollback");

        assert!(repo.find_ticket(t.id).await.expect("query").is_none());
    }

    #[tokio::test]
    async fn duplicate_ticket_no_conflicts() {
        let repo = MemoryRepo::new();
        let t1 = ticket();
        let mut t2 = ticket();
        t2.token = "tok-2".to_string();
        t2.ticket_no = t1.ticket_no.clone();

        let mut tx = repo.begin().await.expect("begin");
        tx.insert_ticket(&t1).await.expect("insert t1");
        tx.commit().await.expect("commit");

        let mut tx2 = repo.begin().await.expect("begin");
        let err = tx2.insert_ticket(&t2).await.expect_err("conflict");
        assert_eq!(err.client_code(), cs_core::ClientCode::Conflict);
    }

    #[tokio::test]
    async fn session_update_rejects_illegal_transition() {
        let repo = MemoryRepo::new();
        let t = ticket();
        let mut tx = repo.begin().await.expect("begin");
        tx.insert_ticket(&t).await.expect("insert ticket");
        let session = Session {
            id: SessionId::new(),
            ticket_id: t.id,
            status: SessionStatus::Closed,
            agent_id: None,
            priority_score: 0.0,
            detected_intent: None,
            ai_urgency: None,
            ai_conversation_handle: None,
            allow_manual_transfer: true,
            queued_at: None,
            started_at: None,
            closed_at: Some(chrono::Utc::now()),
            transfer_at: None,
            transfer_reason: None,
            metadata: Default::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        tx.insert_session(&session).await.expect("insert session");
        tx.commit().await.expect("commit");

        let mut tx2 = repo.begin().await.expect("begin 2");
        let mut reopened = session.clone();
        reopened.status = SessionStatus::Queued;
        let err = tx2.update_session(&reopened).await.expect_err("illegal transition");
        assert_eq!(err.client_code(), cs_core::ClientCode::Conflict);
    }

    #[tokio::test]
    async fn update_message_metadata_persists_a_cached_translation() {
        let repo = MemoryRepo::new();
        let message = Message {
            id: cs_core::ids::MessageId::new(),
            session_id: SessionId::new(),
            sender_type: cs_core::domain::SenderType::Player,
            message_type: cs_core::domain::MessageType::Text,
            content: "hello".to_string(),
            agent_id: None,
            metadata: Default::default(),
            created_at: chrono::Utc::now(),
        };
        let mut tx = repo.begin().await.expect("begin");
        tx.append_message(&message).await.expect("append");
        tx.commit().await.expect("commit");

        let mut cached = message.clone();
        cached.metadata.insert(Message::translation_cache_key("ko"), "안녕하세요".to_string());
        let mut tx2 = repo.begin().await.expect("begin 2");
        tx2.update_message_metadata(&cached).await.expect("update metadata");
        tx2.commit().await.expect("commit 2");

        let stored = repo.find_message(message.id).await.expect("query").expect("present");
        assert_eq!(stored.cached_translation("ko"), Some("안녕하세요"));
    }

    #[tokio::test]
    async fn update_message_metadata_rejects_unknown_message() {
        let repo = MemoryRepo::new();
        let message = Message {
            id: cs_core::ids::MessageId::new(),
            session_id: SessionId::new(),
            sender_type: cs_core::domain::SenderType::Player,
            message_type: cs_core::domain::MessageType::Text,
            content: "hello".to_string(),
            agent_id: None,
            metadata: Default::default(),
            created_at: chrono::Utc::now(),
        };
        let mut tx = repo.begin().await.expect("begin");
        let err = tx.update_message_metadata(&message).await.expect_err("not found");
        assert_eq!(err.client_code(), cs_core::ClientCode::NotFound);
    }
}
