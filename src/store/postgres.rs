use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use super::HelpdeskStore;
use crate::error::Result;
use crate::types::{
    AgentProfile, BotResponse, Conversation, ConversationStatus, DashboardStats, Message,
    MessageKind, NewConversation, SenderKind, Setting, Ticket, TicketStatus,
};
use crate::util::now_iso;

const CONVERSATION_COLUMNS: &str = "id, customer_name, customer_phone, customer_email, channel, status, priority, \
     assigned_agent_id, tags, last_message_at, created_at, updated_at";

const BOT_RESPONSE_COLUMNS: &str =
    "id, keyword, response_text, is_active, category, created_by, created_at, updated_at";

const TICKET_COLUMNS: &str = "id, title, description, status, priority, category, conversation_id, \
     assigned_agent_id, created_by, resolved_at, created_at, updated_at";

const AGENT_COLUMNS: &str = "id, full_name, avatar_url, role, status, created_at, updated_at";

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn parse_conversation_row(row: &PgRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        customer_name: row.get("customer_name"),
        customer_phone: row.get("customer_phone"),
        customer_email: row.get("customer_email"),
        channel: row.get("channel"),
        status: ConversationStatus::parse(&row.get::<String, _>("status")).unwrap_or_default(),
        priority: row.get("priority"),
        assigned_agent_id: row.get("assigned_agent_id"),
        tags: serde_json::from_str::<Vec<String>>(&row.get::<String, _>("tags"))
            .unwrap_or_default(),
        last_message_at: row.get("last_message_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_message_row(row: &PgRow) -> Message {
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_type: SenderKind::parse(&row.get::<String, _>("sender_type"))
            .unwrap_or(SenderKind::Customer),
        sender_id: row.get("sender_id"),
        sender_name: row.get("sender_name"),
        content: row.get("content"),
        message_type: MessageKind::parse(&row.get::<String, _>("message_type")).unwrap_or_default(),
        file_url: row.get("file_url"),
        is_read: row.get("is_read"),
        created_at: row.get("created_at"),
    }
}

fn parse_bot_response_row(row: &PgRow) -> BotResponse {
    BotResponse {
        id: row.get("id"),
        keyword: row.get("keyword"),
        response_text: row.get("response_text"),
        is_active: row.get("is_active"),
        category: row.get("category"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_ticket_row(row: &PgRow) -> Ticket {
    Ticket {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        status: TicketStatus::parse(&row.get::<String, _>("status")).unwrap_or_default(),
        priority: row.get("priority"),
        category: row.get("category"),
        conversation_id: row.get("conversation_id"),
        assigned_agent_id: row.get("assigned_agent_id"),
        created_by: row.get("created_by"),
        resolved_at: row.get("resolved_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_agent_row(row: &PgRow) -> AgentProfile {
    AgentProfile {
        id: row.get("id"),
        full_name: row.get("full_name"),
        avatar_url: row.get("avatar_url"),
        role: row.get("role"),
        status: row.get("status"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl HelpdeskStore for PgStore {
    async fn settings(&self) -> Result<Vec<Setting>> {
        let rows = sqlx::query("SELECT key, value, description, updated_at FROM settings ORDER BY key ASC")
            .fetch_all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Setting {
                key: row.get("key"),
                value: row.get("value"),
                description: row.get("description"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now_iso())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_or_create_conversation(&self, new: &NewConversation) -> Result<Conversation> {
        let now = now_iso();
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(&format!(
            "INSERT INTO conversations \
             (id, customer_name, customer_phone, channel, status, priority, tags, last_message_at, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,'normal','[]',$6,$6,$6) \
             ON CONFLICT (customer_phone) DO UPDATE SET customer_phone = EXCLUDED.customer_phone \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&new.customer_name)
        .bind(&new.customer_phone)
        .bind(&new.channel)
        .bind(new.status.as_str())
        .bind(&now)
        .fetch_one(&self.db)
        .await?;
        Ok(parse_conversation_row(&row))
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(parse_conversation_row))
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY last_message_at DESC NULLS LAST"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.iter().map(parse_conversation_row).collect())
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let tags = serde_json::to_string(&conversation.tags)?;
        sqlx::query(
            "UPDATE conversations SET customer_name = $1, customer_email = $2, status = $3, priority = $4, \
             assigned_agent_id = $5, tags = $6, updated_at = $7 WHERE id = $8",
        )
        .bind(&conversation.customer_name)
        .bind(&conversation.customer_email)
        .bind(conversation.status.as_str())
        .bind(&conversation.priority)
        .bind(&conversation.assigned_agent_id)
        .bind(tags)
        .bind(&conversation.updated_at)
        .bind(&conversation.id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn touch_conversation(
        &self,
        id: &str,
        at: &str,
        reopen: bool,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "UPDATE conversations SET last_message_at = $1, updated_at = $1, \
             status = CASE WHEN $2 THEN 'open' ELSE status END \
             WHERE id = $3 RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(at)
        .bind(reopen)
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(parse_conversation_row))
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_type, sender_id, content, message_type, file_url, is_read, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.sender_type.as_str())
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(&message.file_url)
        .bind(message.is_read)
        .bind(&message.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT m.id, m.conversation_id, m.sender_type, m.sender_id, a.full_name AS sender_name, \
                    m.content, m.message_type, m.file_url, m.is_read, m.created_at \
             FROM messages m \
             LEFT JOIN agents a ON a.id = m.sender_id \
             WHERE m.conversation_id = $1 \
             ORDER BY m.created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.iter().map(parse_message_row).collect())
    }

    async fn mark_messages_read(&self, conversation_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = true \
             WHERE conversation_id = $1 AND sender_type = 'customer' AND is_read = false",
        )
        .bind(conversation_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn bot_responses(&self, active_only: bool) -> Result<Vec<BotResponse>> {
        let rows = sqlx::query(&format!(
            "SELECT {BOT_RESPONSE_COLUMNS} FROM bot_responses \
             WHERE ($1 = false OR is_active = true) ORDER BY created_at ASC, id ASC"
        ))
        .bind(active_only)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.iter().map(parse_bot_response_row).collect())
    }

    async fn bot_response(&self, id: &str) -> Result<Option<BotResponse>> {
        let row = sqlx::query(&format!(
            "SELECT {BOT_RESPONSE_COLUMNS} FROM bot_responses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(parse_bot_response_row))
    }

    async fn save_bot_response(&self, response: &BotResponse) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bot_responses (id, keyword, response_text, is_active, category, created_by, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            ON CONFLICT (id) DO UPDATE SET
                keyword = EXCLUDED.keyword,
                response_text = EXCLUDED.response_text,
                is_active = EXCLUDED.is_active,
                category = EXCLUDED.category,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&response.id)
        .bind(&response.keyword)
        .bind(&response.response_text)
        .bind(response.is_active)
        .bind(&response.category)
        .bind(&response.created_by)
        .bind(&response.created_at)
        .bind(&response.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn delete_bot_response(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bot_responses WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn tickets(&self) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets ORDER BY created_at DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.iter().map(parse_ticket_row).collect())
    }

    async fn ticket(&self, id: &str) -> Result<Option<Ticket>> {
        let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.as_ref().map(parse_ticket_row))
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tickets (
                id, title, description, status, priority, category, conversation_id,
                assigned_agent_id, created_by, resolved_at, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                priority = EXCLUDED.priority,
                category = EXCLUDED.category,
                assigned_agent_id = EXCLUDED.assigned_agent_id,
                resolved_at = EXCLUDED.resolved_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&ticket.id)
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.status.as_str())
        .bind(&ticket.priority)
        .bind(&ticket.category)
        .bind(&ticket.conversation_id)
        .bind(&ticket.assigned_agent_id)
        .bind(&ticket.created_by)
        .bind(&ticket.resolved_at)
        .bind(&ticket.created_at)
        .bind(&ticket.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn agents(&self) -> Result<Vec<AgentProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.iter().map(parse_agent_row).collect())
    }

    async fn agent(&self, id: &str) -> Result<Option<AgentProfile>> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.as_ref().map(parse_agent_row))
    }

    async fn agent_for_token(&self, token: &str) -> Result<Option<AgentProfile>> {
        let row = sqlx::query(
            "SELECT a.id, a.full_name, a.avatar_url, a.role, a.status, a.created_at, a.updated_at \
             FROM agent_tokens t JOIN agents a ON a.id = t.agent_id WHERE t.token = $1",
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(parse_agent_row))
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let total_conversations = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM conversations")
            .fetch_one(&self.db)
            .await?;
        let open_tickets =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM tickets WHERE status = 'open'")
                .fetch_one(&self.db)
                .await?;
        let active_agents =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM agents WHERE status = 'online'")
                .fetch_one(&self.db)
                .await?;
        Ok(DashboardStats {
            total_conversations,
            open_tickets,
            active_agents,
        })
    }
}
