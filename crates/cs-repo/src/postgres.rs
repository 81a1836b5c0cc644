//! `sqlx`-backed Postgres implementation of [`Repo`]/[`RepoTx`] (§4.1).
//!
//! Queries are plain runtime strings bound via `sqlx::query`/`query_as`
//! (rather than the `query!` compile-time macros) since this crate is built
//! and reviewed without a live database available.

use async_trait::async_trait;
use cs_core::domain::{
    Game, IssueType, Message, MessageType, QuickReply, QuickReplyCategory, Role,
    SatisfactionRating, SenderType, Server, Session, SessionStatus, Ticket, TicketMessage,
    TicketPriority, TicketStatus, Urgency, User,
};
use cs_core::ids::{
    GameId, IssueTypeId, MessageId, QuickReplyCategoryId, QuickReplyId, ServerId, SessionId,
    TicketId, TicketMessageId, UserId,
};
use cs_core::{CsError, Result};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::from_sqlx;
use crate::repo::{Page, Pagination, Repo, RepoTx, SessionFilter, TicketFilter};

#[derive(Clone)]
pub struct PostgresRepo {
    pool: PgPool,
}

impl PostgresRepo {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(from_sqlx)?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CsError::TransientStorage(e.to_string()))
    }
}

fn parse_ticket_status(s: &str) -> Result<TicketStatus> {
    serde_plain(s)
}
fn parse_ticket_priority(s: &str) -> Result<TicketPriority> {
    serde_plain(s)
}
fn parse_session_status(s: &str) -> Result<SessionStatus> {
    serde_plain(s)
}
fn parse_urgency(s: &str) -> Result<Urgency> {
    serde_plain(s)
}
fn parse_role(s: &str) -> Result<Role> {
    serde_plain(s)
}
fn parse_sender_type(s: &str) -> Result<SenderType> {
    serde_plain(s)
}
fn parse_message_type(s: &str) -> Result<MessageType> {
    serde_plain(s)
}

/// Round-trips a DB text column through the same serde representation used
/// on the wire, so e.g. `"IN_PROGRESS"` parses the same way everywhere.
fn serde_plain<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| CsError::Internal(format!("bad enum column value {s:?}: {e}")))
}

fn to_plain<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => unreachable!("enum columns always serialize to a JSON string"),
    }
}

fn row_to_ticket(row: &sqlx::postgres::PgRow) -> Result<Ticket> {
    let issue_type_ids: Vec<uuid::Uuid> = row.try_get("issue_type_ids").map_err(from_sqlx)?;
    let attachments: serde_json::Value = row.try_get("attachments").map_err(from_sqlx)?;
    Ok(Ticket {
        id: TicketId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        ticket_no: row.try_get("ticket_no").map_err(from_sqlx)?,
        token: row.try_get("token").map_err(from_sqlx)?,
        game_id: GameId::from_uuid(row.try_get("game_id").map_err(from_sqlx)?),
        server_id: row
            .try_get::<Option<uuid::Uuid>, _>("server_id")
            .map_err(from_sqlx)?
            .map(ServerId::from_uuid),
        server_name: row.try_get("server_name").map_err(from_sqlx)?,
        player_id_or_name: row.try_get("player_id_or_name").map_err(from_sqlx)?,
        description: row.try_get("description").map_err(from_sqlx)?,
        occurred_at: row.try_get("occurred_at").map_err(from_sqlx)?,
        payment_order_no: row.try_get("payment_order_no").map_err(from_sqlx)?,
        status: parse_ticket_status(&row.try_get::<String, _>("status").map_err(from_sqlx)?)?,
        priority: parse_ticket_priority(&row.try_get::<String, _>("priority").map_err(from_sqlx)?)?,
        issue_type_ids: issue_type_ids.into_iter().map(IssueTypeId::from_uuid).collect(),
        attachments: serde_json::from_value(attachments)
            .map_err(|e| CsError::Internal(format!("bad attachments json: {e}")))?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(from_sqlx)?,
    })
}

fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<Session> {
    let ai_urgency: Option<String> = row.try_get("ai_urgency").map_err(from_sqlx)?;
    let metadata: serde_json::Value = row.try_get("metadata").map_err(from_sqlx)?;
    Ok(Session {
        id: SessionId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        ticket_id: TicketId::from_uuid(row.try_get("ticket_id").map_err(from_sqlx)?),
        status: parse_session_status(&row.try_get::<String, _>("status").map_err(from_sqlx)?)?,
        agent_id: row
            .try_get::<Option<uuid::Uuid>, _>("agent_id")
            .map_err(from_sqlx)?
            .map(UserId::from_uuid),
        priority_score: row.try_get("priority_score").map_err(from_sqlx)?,
        detected_intent: row.try_get("detected_intent").map_err(from_sqlx)?,
        ai_urgency: ai_urgency.map(|s| parse_urgency(&s)).transpose()?,
        ai_conversation_handle: row.try_get("ai_conversation_handle").map_err(from_sqlx)?,
        allow_manual_transfer: row.try_get("allow_manual_transfer").map_err(from_sqlx)?,
        queued_at: row.try_get("queued_at").map_err(from_sqlx)?,
        started_at: row.try_get("started_at").map_err(from_sqlx)?,
        closed_at: row.try_get("closed_at").map_err(from_sqlx)?,
        transfer_at: row.try_get("transfer_at").map_err(from_sqlx)?,
        transfer_reason: row.try_get("transfer_reason").map_err(from_sqlx)?,
        metadata: serde_json::from_value(metadata)
            .map_err(|e| CsError::Internal(format!("bad session metadata json: {e}")))?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(from_sqlx)?,
    })
}

fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<Message> {
    let metadata: serde_json::Value = row.try_get("metadata").map_err(from_sqlx)?;
    Ok(Message {
        id: MessageId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        session_id: SessionId::from_uuid(row.try_get("session_id").map_err(from_sqlx)?),
        sender_type: parse_sender_type(&row.try_get::<String, _>("sender_type").map_err(from_sqlx)?)?,
        message_type: parse_message_type(&row.try_get::<String, _>("message_type").map_err(from_sqlx)?)?,
        content: row.try_get("content").map_err(from_sqlx)?,
        agent_id: row
            .try_get::<Option<uuid::Uuid>, _>("agent_id")
            .map_err(from_sqlx)?
            .map(UserId::from_uuid),
        metadata: serde_json::from_value(metadata)
            .map_err(|e| CsError::Internal(format!("bad message metadata json: {e}")))?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
    })
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        username: row.try_get("username").map_err(from_sqlx)?,
        password_hash: row.try_get("password_hash").map_err(from_sqlx)?,
        role: parse_role(&row.try_get::<String, _>("role").map_err(from_sqlx)?)?,
        real_name: row.try_get("real_name").map_err(from_sqlx)?,
        is_online: row.try_get("is_online").map_err(from_sqlx)?,
        last_login_at: row.try_get("last_login_at").map_err(from_sqlx)?,
    })
}

fn row_to_game(row: &sqlx::postgres::PgRow) -> Result<Game> {
    Ok(Game {
        id: GameId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        name: row.try_get("name").map_err(from_sqlx)?,
        enabled: row.try_get("enabled").map_err(from_sqlx)?,
        ai_credential_ciphertext: row.try_get("ai_credential_ciphertext").map_err(from_sqlx)?,
        ai_base_url: row.try_get("ai_base_url").map_err(from_sqlx)?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(from_sqlx)?,
    })
}

fn row_to_server(row: &sqlx::postgres::PgRow) -> Result<Server> {
    Ok(Server {
        id: ServerId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        game_id: GameId::from_uuid(row.try_get("game_id").map_err(from_sqlx)?),
        name: row.try_get("name").map_err(from_sqlx)?,
        enabled: row.try_get("enabled").map_err(from_sqlx)?,
    })
}

fn row_to_issue_type(row: &sqlx::postgres::PgRow) -> Result<IssueType> {
    Ok(IssueType {
        id: IssueTypeId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        game_id: GameId::from_uuid(row.try_get("game_id").map_err(from_sqlx)?),
        name: row.try_get("name").map_err(from_sqlx)?,
        priority_weight: row.try_get("priority_weight").map_err(from_sqlx)?,
        require_direct_transfer: row.try_get("require_direct_transfer").map_err(from_sqlx)?,
        enabled: row.try_get("enabled").map_err(from_sqlx)?,
        sort_order: row.try_get("sort_order").map_err(from_sqlx)?,
    })
}

fn row_to_ticket_message(row: &sqlx::postgres::PgRow) -> Result<TicketMessage> {
    let metadata: serde_json::Value = row.try_get("metadata").map_err(from_sqlx)?;
    Ok(TicketMessage {
        id: TicketMessageId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        ticket_id: TicketId::from_uuid(row.try_get("ticket_id").map_err(from_sqlx)?),
        sender_id: row
            .try_get::<Option<uuid::Uuid>, _>("sender_id")
            .map_err(from_sqlx)?
            .map(UserId::from_uuid),
        content: row.try_get("content").map_err(from_sqlx)?,
        metadata: serde_json::from_value(metadata)
            .map_err(|e| CsError::Internal(format!("bad ticket_message metadata json: {e}")))?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
    })
}

fn row_to_quick_reply_category(row: &sqlx::postgres::PgRow) -> Result<QuickReplyCategory> {
    Ok(QuickReplyCategory {
        id: QuickReplyCategoryId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        name: row.try_get("name").map_err(from_sqlx)?,
        sort_order: row.try_get("sort_order").map_err(from_sqlx)?,
        deleted_at: row.try_get("deleted_at").map_err(from_sqlx)?,
    })
}

fn row_to_quick_reply(row: &sqlx::postgres::PgRow) -> Result<QuickReply> {
    Ok(QuickReply {
        id: QuickReplyId::from_uuid(row.try_get("id").map_err(from_sqlx)?),
        category_id: row
            .try_get::<Option<uuid::Uuid>, _>("category_id")
            .map_err(from_sqlx)?
            .map(QuickReplyCategoryId::from_uuid),
        title: row.try_get("title").map_err(from_sqlx)?,
        body: row.try_get("body").map_err(from_sqlx)?,
        usage_count: row.try_get("usage_count").map_err(from_sqlx)?,
        is_favorite: row.try_get("is_favorite").map_err(from_sqlx)?,
        deleted_at: row.try_get("deleted_at").map_err(from_sqlx)?,
    })
}

fn row_to_satisfaction_rating(row: &sqlx::postgres::PgRow) -> Result<SatisfactionRating> {
    Ok(SatisfactionRating {
        session_id: SessionId::from_uuid(row.try_get("session_id").map_err(from_sqlx)?),
        rating: row.try_get("rating").map_err(from_sqlx)?,
        comment: row.try_get("comment").map_err(from_sqlx)?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
    })
}

#[async_trait]
impl Repo for PostgresRepo {
    async fn begin(&self) -> Result<Box<dyn RepoTx>> {
        let tx = self.pool.begin().await.map_err(from_sqlx)?;
        Ok(Box::new(PostgresTx { tx }))
    }

    async fn get_game(&self, id: GameId) -> Result<Option<Game>> {
        let row = sqlx::query("SELECT * FROM games WHERE id = $1")
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_game).transpose()
    }

    async fn list_games(&self) -> Result<Vec<Game>> {
        let rows = sqlx::query("SELECT * FROM games ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_game).collect()
    }

    async fn get_server(&self, id: ServerId) -> Result<Option<Server>> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = $1")
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_server).transpose()
    }

    async fn list_servers(&self, game_id: GameId) -> Result<Vec<Server>> {
        let rows = sqlx::query("SELECT * FROM servers WHERE game_id = $1 ORDER BY name")
            .bind(game_id.into_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_server).collect()
    }

    async fn list_issue_types(&self, game_id: GameId) -> Result<Vec<IssueType>> {
        let rows = sqlx::query("SELECT * FROM issue_types WHERE game_id = $1 ORDER BY sort_order")
            .bind(game_id.into_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_issue_type).collect()
    }

    async fn get_issue_types(&self, ids: &[IssueTypeId]) -> Result<Vec<IssueType>> {
        let uuids: Vec<uuid::Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
        let rows = sqlx::query("SELECT * FROM issue_types WHERE id = ANY($1)")
            .bind(uuids)
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_issue_type).collect()
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn list_online_agents(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users WHERE is_online AND role = 'AGENT'")
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_user).collect()
    }

    async fn find_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let row = sqlx::query("SELECT * FROM tickets WHERE id = $1")
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn find_ticket_by_token(&self, token: &str) -> Result<Option<Ticket>> {
        let row = sqlx::query("SELECT * FROM tickets WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn find_ticket_by_no(&self, ticket_no: &str) -> Result<Option<Ticket>> {
        let row = sqlx::query("SELECT * FROM tickets WHERE ticket_no = $1")
            .bind(ticket_no)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn find_open_ticket(
        &self,
        game_id: GameId,
        server_key: &str,
        player_id_or_name: &str,
        issue_type_id: IssueTypeId,
    ) -> Result<Option<Ticket>> {
        let row = sqlx::query(
            "SELECT * FROM tickets \
             WHERE game_id = $1 \
               AND COALESCE(server_id::text, server_name, '') = $2 \
               AND player_id_or_name = $3 \
               AND $4 = ANY(issue_type_ids) \
               AND status NOT IN ('RESOLVED', 'CLOSED') \
             LIMIT 1",
        )
        .bind(game_id.into_uuid())
        .bind(server_key)
        .bind(player_id_or_name)
        .bind(issue_type_id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn search_tickets(&self, filter: &TicketFilter, page: Pagination) -> Result<Page<Ticket>> {
        // Every optional filter is always present in the bound parameter
        // list as a `$n::type IS NULL OR ...` clause, so the placeholder
        // count in the SQL text never depends on which filters are set.
        const WHERE_SQL: &str = "\
            ($1::uuid IS NULL OR game_id = $1) \
            AND ($2::text IS NULL OR status = $2) \
            AND ($3::text IS NULL OR priority = $3) \
            AND ($4::uuid IS NULL OR $4 = ANY(issue_type_ids)) \
            AND ($5::text IS NULL OR player_id_or_name = $5) \
            AND ($6::uuid IS NULL OR server_id = $6)";

        macro_rules! bind_filters {
            ($q:expr) => {
                $q.bind(filter.game_id.map(|g| g.into_uuid()))
                    .bind(filter.status.as_ref().map(to_plain))
                    .bind(filter.priority.as_ref().map(to_plain))
                    .bind(filter.issue_type_id.map(|i| i.into_uuid()))
                    .bind(filter.player_id_or_name.clone())
                    .bind(filter.server_id.map(|s| s.into_uuid()))
            };
        }

        let total: i64 = bind_filters!(sqlx::query_scalar(&format!(
            "SELECT count(*) FROM tickets WHERE {WHERE_SQL}"
        )))
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;

        let rows = bind_filters!(sqlx::query(&format!(
            "SELECT * FROM tickets WHERE {WHERE_SQL} ORDER BY created_at DESC OFFSET $7 LIMIT $8"
        )))
        .bind(page.offset as i64)
        .bind(page.limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;

        let items = rows.iter().map(row_to_ticket).collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total: total.max(0) as u64 })
    }

    async fn find_session(&self, id: SessionId) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn find_live_session_for_ticket(&self, ticket_id: TicketId) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE ticket_id = $1 AND status <> 'CLOSED'")
            .bind(ticket_id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn list_queued_sessions(&self, game_id: Option<GameId>) -> Result<Vec<Session>> {
        let rows = match game_id {
            Some(g) => {
                sqlx::query(
                    "SELECT s.* FROM sessions s JOIN tickets t ON t.id = s.ticket_id \
                     WHERE s.status = 'QUEUED' AND t.game_id = $1",
                )
                .bind(g.into_uuid())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM sessions WHERE status = 'QUEUED'")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(from_sqlx)?;
        rows.iter().map(row_to_session).collect()
    }

    async fn list_sessions(&self, filter: &SessionFilter, page: Pagination) -> Result<Page<Session>> {
        const FROM_SQL: &str = "FROM sessions s JOIN tickets t ON t.id = s.ticket_id";
        const WHERE_SQL: &str = "\
            ($1::text IS NULL OR s.status = $1) \
            AND ($2::uuid IS NULL OR s.agent_id = $2) \
            AND ($3::uuid IS NULL OR t.game_id = $3) \
            AND ($4::timestamptz IS NULL OR s.created_at >= $4) \
            AND ($5::timestamptz IS NULL OR s.created_at <= $5)";

        macro_rules! bind_filters {
            ($q:expr) => {
                $q.bind(filter.status.as_ref().map(to_plain))
                    .bind(filter.agent_id.map(|a| a.into_uuid()))
                    .bind(filter.game_id.map(|g| g.into_uuid()))
                    .bind(filter.created_after)
                    .bind(filter.created_before)
            };
        }

        let total: i64 = bind_filters!(sqlx::query_scalar(&format!(
            "SELECT count(*) {FROM_SQL} WHERE {WHERE_SQL}"
        )))
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;
        let rows = bind_filters!(sqlx::query(&format!(
            "SELECT s.* {FROM_SQL} WHERE {WHERE_SQL} ORDER BY s.created_at DESC OFFSET $6 LIMIT $7"
        )))
        .bind(page.offset as i64)
        .bind(page.limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;
        let items = rows.iter().map(row_to_session).collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total: total.max(0) as u64 })
    }

    async fn find_message(&self, id: cs_core::ids::MessageId) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = $1")
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn list_messages(&self, session_id: SessionId) -> Result<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = $1 ORDER BY created_at ASC")
            .bind(session_id.into_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_message).collect()
    }

    async fn list_ticket_messages(&self, ticket_id: TicketId) -> Result<Vec<TicketMessage>> {
        let rows =
            sqlx::query("SELECT * FROM ticket_messages WHERE ticket_id = $1 ORDER BY created_at ASC")
                .bind(ticket_id.into_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(from_sqlx)?;
        rows.iter().map(row_to_ticket_message).collect()
    }

    async fn list_quick_reply_categories(&self) -> Result<Vec<QuickReplyCategory>> {
        let rows = sqlx::query(
            "SELECT * FROM quick_reply_categories WHERE deleted_at IS NULL ORDER BY sort_order",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;
        rows.iter().map(row_to_quick_reply_category).collect()
    }

    async fn list_quick_replies(&self, category_id: Option<QuickReplyCategoryId>) -> Result<Vec<QuickReply>> {
        let rows = sqlx::query(
            "SELECT * FROM quick_replies \
             WHERE deleted_at IS NULL AND ($1::uuid IS NULL OR category_id = $1) \
             ORDER BY usage_count DESC",
        )
        .bind(category_id.map(|c| c.into_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;
        rows.iter().map(row_to_quick_reply).collect()
    }

    async fn get_satisfaction_rating(&self, session_id: SessionId) -> Result<Option<SatisfactionRating>> {
        let row = sqlx::query("SELECT * FROM satisfaction_ratings WHERE session_id = $1")
            .bind(session_id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_satisfaction_rating).transpose()
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTx {
    fn tx_mut(&mut self) -> &mut Transaction<'static, Postgres> {
        &mut self.tx
    }
}

#[async_trait]
impl RepoTx for PostgresTx {
    async fn insert_game(&mut self, game: &Game) -> Result<()> {
        sqlx::query(
            "INSERT INTO games (id, name, enabled, ai_credential_ciphertext, ai_base_url, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(game.id.into_uuid())
        .bind(&game.name)
        .bind(game.enabled)
        .bind(&game.ai_credential_ciphertext)
        .bind(&game.ai_base_url)
        .bind(game.created_at)
        .bind(game.updated_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn update_game(&mut self, game: &Game) -> Result<()> {
        let result = sqlx::query(
            "UPDATE games SET name=$2, enabled=$3, ai_credential_ciphertext=$4, ai_base_url=$5, updated_at=$6 \
             WHERE id=$1",
        )
        .bind(game.id.into_uuid())
        .bind(&game.name)
        .bind(game.enabled)
        .bind(&game.ai_credential_ciphertext)
        .bind(&game.ai_base_url)
        .bind(game.updated_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CsError::not_found("game"));
        }
        Ok(())
    }

    async fn insert_server(&mut self, server: &Server) -> Result<()> {
        sqlx::query("INSERT INTO servers (id, game_id, name, enabled) VALUES ($1,$2,$3,$4)")
            .bind(server.id.into_uuid())
            .bind(server.game_id.into_uuid())
            .bind(&server.name)
            .bind(server.enabled)
            .execute(self.tx_mut())
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    async fn insert_issue_type(&mut self, issue_type: &IssueType) -> Result<()> {
        sqlx::query(
            "INSERT INTO issue_types (id, game_id, name, priority_weight, require_direct_transfer, enabled, sort_order) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(issue_type.id.into_uuid())
        .bind(issue_type.game_id.into_uuid())
        .bind(&issue_type.name)
        .bind(issue_type.priority_weight)
        .bind(issue_type.require_direct_transfer)
        .bind(issue_type.enabled)
        .bind(issue_type.sort_order)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn update_issue_type(&mut self, issue_type: &IssueType) -> Result<()> {
        let result = sqlx::query(
            "UPDATE issue_types SET name=$2, priority_weight=$3, require_direct_transfer=$4, enabled=$5, sort_order=$6 \
             WHERE id=$1",
        )
        .bind(issue_type.id.into_uuid())
        .bind(&issue_type.name)
        .bind(issue_type.priority_weight)
        .bind(issue_type.require_direct_transfer)
        .bind(issue_type.enabled)
        .bind(issue_type.sort_order)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CsError::not_found("issue_type"));
        }
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, role, real_name, is_online, last_login_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(user.id.into_uuid())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(to_plain(&user.role))
        .bind(&user.real_name)
        .bind(user.is_online)
        .bind(user.last_login_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET username=$2, password_hash=$3, role=$4, real_name=$5, is_online=$6, last_login_at=$7 \
             WHERE id=$1",
        )
        .bind(user.id.into_uuid())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(to_plain(&user.role))
        .bind(&user.real_name)
        .bind(user.is_online)
        .bind(user.last_login_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CsError::not_found("user"));
        }
        Ok(())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        let issue_type_ids: Vec<uuid::Uuid> =
            ticket.issue_type_ids.iter().map(|id| id.into_uuid()).collect();
        let attachments = serde_json::to_value(&ticket.attachments)
            .map_err(|e| CsError::Internal(format!("attachments serialize: {e}")))?;
        sqlx::query(
            "INSERT INTO tickets (id, ticket_no, token, game_id, server_id, server_name, player_id_or_name, \
             description, occurred_at, payment_order_no, status, priority, issue_type_ids, attachments, \
             created_at, updated_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)",
        )
        .bind(ticket.id.into_uuid())
        .bind(&ticket.ticket_no)
        .bind(&ticket.token)
        .bind(ticket.game_id.into_uuid())
        .bind(ticket.server_id.map(|s| s.into_uuid()))
        .bind(&ticket.server_name)
        .bind(&ticket.player_id_or_name)
        .bind(&ticket.description)
        .bind(ticket.occurred_at)
        .bind(&ticket.payment_order_no)
        .bind(to_plain(&ticket.status))
        .bind(to_plain(&ticket.priority))
        .bind(issue_type_ids)
        .bind(attachments)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        let issue_type_ids: Vec<uuid::Uuid> =
            ticket.issue_type_ids.iter().map(|id| id.into_uuid()).collect();
        let attachments = serde_json::to_value(&ticket.attachments)
            .map_err(|e| CsError::Internal(format!("attachments serialize: {e}")))?;
        let result = sqlx::query(
            "UPDATE tickets SET server_id=$2, server_name=$3, description=$4, occurred_at=$5, \
             payment_order_no=$6, status=$7, priority=$8, issue_type_ids=$9, attachments=$10, updated_at=$11 \
             WHERE id=$1",
        )
        .bind(ticket.id.into_uuid())
        .bind(ticket.server_id.map(|s| s.into_uuid()))
        .bind(&ticket.server_name)
        .bind(&ticket.description)
        .bind(ticket.occurred_at)
        .bind(&ticket.payment_order_no)
        .bind(to_plain(&ticket.status))
        .bind(to_plain(&ticket.priority))
        .bind(issue_type_ids)
        .bind(attachments)
        .bind(ticket.updated_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CsError::not_found("ticket"));
        }
        Ok(())
    }

    async fn insert_session(&mut self, session: &Session) -> Result<()> {
        let metadata = serde_json::to_value(&session.metadata)
            .map_err(|e| CsError::Internal(format!("session metadata serialize: {e}")))?;
        sqlx::query(
            "INSERT INTO sessions (id, ticket_id, status, agent_id, priority_score, detected_intent, \
             ai_urgency, ai_conversation_handle, allow_manual_transfer, queued_at, started_at, closed_at, \
             transfer_at, transfer_reason, metadata, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)",
        )
        .bind(session.id.into_uuid())
        .bind(session.ticket_id.into_uuid())
        .bind(to_plain(&session.status))
        .bind(session.agent_id.map(|a| a.into_uuid()))
        .bind(session.priority_score)
        .bind(&session.detected_intent)
        .bind(session.ai_urgency.as_ref().map(to_plain))
        .bind(&session.ai_conversation_handle)
        .bind(session.allow_manual_transfer)
        .bind(session.queued_at)
        .bind(session.started_at)
        .bind(session.closed_at)
        .bind(session.transfer_at)
        .bind(&session.transfer_reason)
        .bind(metadata)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn update_session(&mut self, session: &Session) -> Result<()> {
        if !session.satisfies_agent_invariant() {
            return Err(CsError::conflict("agentId must be set iff status = IN_PROGRESS"));
        }
        let metadata = serde_json::to_value(&session.metadata)
            .map_err(|e| CsError::Internal(format!("session metadata serialize: {e}")))?;
        let result = sqlx::query(
            "UPDATE sessions SET status=$2, agent_id=$3, priority_score=$4, detected_intent=$5, \
             ai_urgency=$6, ai_conversation_handle=$7, allow_manual_transfer=$8, queued_at=$9, \
             started_at=$10, closed_at=$11, transfer_at=$12, transfer_reason=$13, metadata=$14, updated_at=$15 \
             WHERE id=$1",
        )
        .bind(session.id.into_uuid())
        .bind(to_plain(&session.status))
        .bind(session.agent_id.map(|a| a.into_uuid()))
        .bind(session.priority_score)
        .bind(&session.detected_intent)
        .bind(session.ai_urgency.as_ref().map(to_plain))
        .bind(&session.ai_conversation_handle)
        .bind(session.allow_manual_transfer)
        .bind(session.queued_at)
        .bind(session.started_at)
        .bind(session.closed_at)
        .bind(session.transfer_at)
        .bind(&session.transfer_reason)
        .bind(metadata)
        .bind(session.updated_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CsError::not_found("session"));
        }
        Ok(())
    }

    async fn append_message(&mut self, message: &Message) -> Result<()> {
        let metadata = serde_json::to_value(&message.metadata)
            .map_err(|e| CsError::Internal(format!("message metadata serialize: {e}")))?;
        sqlx::query(
            "INSERT INTO messages (id, session_id, sender_type, message_type, content, agent_id, metadata, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(message.id.into_uuid())
        .bind(message.session_id.into_uuid())
        .bind(to_plain(&message.sender_type))
        .bind(to_plain(&message.message_type))
        .bind(&message.content)
        .bind(message.agent_id.map(|a| a.into_uuid()))
        .bind(metadata)
        .bind(message.created_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn update_message_metadata(&mut self, message: &Message) -> Result<()> {
        let metadata = serde_json::to_value(&message.metadata)
            .map_err(|e| CsError::Internal(format!("message metadata serialize: {e}")))?;
        let result = sqlx::query("UPDATE messages SET metadata = $1 WHERE id = $2")
            .bind(metadata)
            .bind(message.id.into_uuid())
            .execute(self.tx_mut())
            .await
            .map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CsError::not_found("message"));
        }
        Ok(())
    }

    async fn append_ticket_message(&mut self, message: &TicketMessage) -> Result<()> {
        let metadata = serde_json::to_value(&message.metadata)
            .map_err(|e| CsError::Internal(format!("ticket_message metadata serialize: {e}")))?;
        sqlx::query(
            "INSERT INTO ticket_messages (id, ticket_id, sender_id, content, metadata, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(message.id.into_uuid())
        .bind(message.ticket_id.into_uuid())
        .bind(message.sender_id.map(|s| s.into_uuid()))
        .bind(&message.content)
        .bind(metadata)
        .bind(message.created_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn insert_quick_reply_category(&mut self, category: &QuickReplyCategory) -> Result<()> {
        sqlx::query("INSERT INTO quick_reply_categories (id, name, sort_order, deleted_at) VALUES ($1,$2,$3,$4)")
            .bind(category.id.into_uuid())
            .bind(&category.name)
            .bind(category.sort_order)
            .bind(category.deleted_at)
            .execute(self.tx_mut())
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    async fn insert_quick_reply(&mut self, quick_reply: &QuickReply) -> Result<()> {
        sqlx::query(
            "INSERT INTO quick_replies (id, category_id, title, body, usage_count, is_favorite, deleted_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(quick_reply.id.into_uuid())
        .bind(quick_reply.category_id.map(|c| c.into_uuid()))
        .bind(&quick_reply.title)
        .bind(&quick_reply.body)
        .bind(quick_reply.usage_count)
        .bind(quick_reply.is_favorite)
        .bind(quick_reply.deleted_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn update_quick_reply(&mut self, quick_reply: &QuickReply) -> Result<()> {
        let result = sqlx::query(
            "UPDATE quick_replies SET category_id=$2, title=$3, body=$4, usage_count=$5, is_favorite=$6, deleted_at=$7 \
             WHERE id=$1",
        )
        .bind(quick_reply.id.into_uuid())
        .bind(quick_reply.category_id.map(|c| c.into_uuid()))
        .bind(&quick_reply.title)
        .bind(&quick_reply.body)
        .bind(quick_reply.usage_count)
        .bind(quick_reply.is_favorite)
        .bind(quick_reply.deleted_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CsError::not_found("quick_reply"));
        }
        Ok(())
    }

    async fn upsert_satisfaction_rating(&mut self, rating: &SatisfactionRating) -> Result<()> {
        if !SatisfactionRating::is_valid_rating(rating.rating) {
            return Err(CsError::validation("rating must be 1..=5"));
        }
        sqlx::query(
            "INSERT INTO satisfaction_ratings (session_id, rating, comment, created_at) VALUES ($1,$2,$3,$4) \
             ON CONFLICT (session_id) DO UPDATE SET rating=$2, comment=$3",
        )
        .bind(rating.session_id.into_uuid())
        .bind(rating.rating)
        .bind(&rating.comment)
        .bind(rating.created_at)
        .execute(self.tx_mut())
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(from_sqlx)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(from_sqlx)
    }
}
