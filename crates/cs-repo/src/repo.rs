//! The transactional data-access boundary (§4.1).
//!
//! `Repo` exposes read queries directly; anything that mutates more than one
//! row as a single unit of work goes through a [`RepoTx`] so the Postgres
//! implementation can back it with a real `sqlx::Transaction` and the
//! in-memory test double can back it with a mutex-guarded map swap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cs_core::domain::{
    Game, IssueType, Message, QuickReply, QuickReplyCategory, SatisfactionRating, Server,
    Session, SessionStatus, Ticket, TicketMessage, TicketPriority, TicketStatus, User,
};
use cs_core::ids::{GameId, IssueTypeId, ServerId, SessionId, TicketId, UserId};
use cs_core::Result;

/// Offset pagination shared by every `search_*`/`list_*` query.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit: limit.max(1) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub game_id: Option<GameId>,
    pub server_id: Option<ServerId>,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub issue_type_id: Option<IssueTypeId>,
    pub player_id_or_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub game_id: Option<GameId>,
    pub status: Option<SessionStatus>,
    pub agent_id: Option<UserId>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// A page of results plus the total row count ignoring `offset`/`limit`,
/// needed by list UIs to render page counts.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[async_trait]
pub trait Repo: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RepoTx>>;

    // --- Catalog -----------------------------------------------------
    async fn get_game(&self, id: GameId) -> Result<Option<Game>>;
    async fn list_games(&self) -> Result<Vec<Game>>;
    async fn get_server(&self, id: ServerId) -> Result<Option<Server>>;
    async fn list_servers(&self, game_id: GameId) -> Result<Vec<Server>>;
    async fn list_issue_types(&self, game_id: GameId) -> Result<Vec<IssueType>>;
    async fn get_issue_types(&self, ids: &[IssueTypeId]) -> Result<Vec<IssueType>>;

    // --- Users ---------------------------------------------------------
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn list_online_agents(&self) -> Result<Vec<User>>;

    // --- Tickets ---------------------------------------------------------
    async fn find_ticket(&self, id: TicketId) -> Result<Option<Ticket>>;
    async fn find_ticket_by_token(&self, token: &str) -> Result<Option<Ticket>>;
    async fn find_ticket_by_no(&self, ticket_no: &str) -> Result<Option<Ticket>>;
    /// The "does this player already have an open ticket" lookup backing the
    /// unique-open-ticket invariant (§3, §6).
    async fn find_open_ticket(
        &self,
        game_id: GameId,
        server_key: &str,
        player_id_or_name: &str,
        issue_type_id: IssueTypeId,
    ) -> Result<Option<Ticket>>;
    async fn search_tickets(&self, filter: &TicketFilter, page: Pagination) -> Result<Page<Ticket>>;

    // --- Sessions ---------------------------------------------------------
    async fn find_session(&self, id: SessionId) -> Result<Option<Session>>;
    async fn find_live_session_for_ticket(&self, ticket_id: TicketId) -> Result<Option<Session>>;
    /// Queued sessions across the given game (or all games), unordered; the
    /// caller applies [`cs_priority::ordering_key`] (§4.4, §4.5).
    async fn list_queued_sessions(&self, game_id: Option<GameId>) -> Result<Vec<Session>>;
    async fn list_sessions(&self, filter: &SessionFilter, page: Pagination) -> Result<Page<Session>>;

    // --- Messages ---------------------------------------------------------
    async fn find_message(&self, id: cs_core::ids::MessageId) -> Result<Option<Message>>;
    async fn list_messages(&self, session_id: SessionId) -> Result<Vec<Message>>;
    async fn list_ticket_messages(&self, ticket_id: TicketId) -> Result<Vec<TicketMessage>>;

    // --- Quick replies ---------------------------------------------------------
    async fn list_quick_reply_categories(&self) -> Result<Vec<QuickReplyCategory>>;
    async fn list_quick_replies(&self, category_id: Option<cs_core::ids::QuickReplyCategoryId>) -> Result<Vec<QuickReply>>;

    // --- Satisfaction ---------------------------------------------------------
    async fn get_satisfaction_rating(&self, session_id: SessionId) -> Result<Option<SatisfactionRating>>;
}

/// A single atomic unit of work. Every method either fully applies or, on
/// error, leaves the underlying store untouched once `rollback`/drop occurs.
#[async_trait]
pub trait RepoTx: Send {
    async fn insert_game(&mut self, game: &Game) -> Result<()>;
    async fn update_game(&mut self, game: &Game) -> Result<()>;
    async fn insert_server(&mut self, server: &Server) -> Result<()>;
    async fn insert_issue_type(&mut self, issue_type: &IssueType) -> Result<()>;
    async fn update_issue_type(&mut self, issue_type: &IssueType) -> Result<()>;

    async fn insert_user(&mut self, user: &User) -> Result<()>;
    async fn update_user(&mut self, user: &User) -> Result<()>;

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<()>;
    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<()>;

    async fn insert_session(&mut self, session: &Session) -> Result<()>;
    async fn update_session(&mut self, session: &Session) -> Result<()>;

    async fn append_message(&mut self, message: &Message) -> Result<()>;
    /// Persists `message.metadata` (e.g. a cached translation, §4.3/§8) back
    /// onto an already-appended message. Content/sender fields are immutable
    /// once appended; only `metadata` is ever rewritten.
    async fn update_message_metadata(&mut self, message: &Message) -> Result<()>;
    async fn append_ticket_message(&mut self, message: &TicketMessage) -> Result<()>;

    async fn insert_quick_reply_category(&mut self, category: &QuickReplyCategory) -> Result<()>;
    async fn insert_quick_reply(&mut self, quick_reply: &QuickReply) -> Result<()>;
    async fn update_quick_reply(&mut self, quick_reply: &QuickReply) -> Result<()>;

    async fn upsert_satisfaction_rating(&mut self, rating: &SatisfactionRating) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}
