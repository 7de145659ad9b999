use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AgentProfile, BotResponse, Conversation, DashboardStats, Message, NewConversation, Setting,
    Ticket,
};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgStore;

/// Row storage behind every handler.
#[async_trait]
pub trait HelpdeskStore: Send + Sync {
    async fn settings(&self) -> Result<Vec<Setting>>;

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Returns the conversation for `new.customer_phone`, creating it when the
    /// phone has never been seen. Atomic per phone number.
    async fn find_or_create_conversation(&self, new: &NewConversation) -> Result<Conversation>;

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Most recently active first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    async fn save_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Sets `last_message_at`, and forces status `open` when `reopen` is set.
    async fn touch_conversation(
        &self,
        id: &str,
        at: &str,
        reopen: bool,
    ) -> Result<Option<Conversation>>;

    async fn insert_message(&self, message: &Message) -> Result<()>;

    /// Oldest first, with `sender_name` filled for known agents.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Marks unread customer messages as read, returning how many changed.
    async fn mark_messages_read(&self, conversation_id: &str) -> Result<u64>;

    async fn bot_responses(&self, active_only: bool) -> Result<Vec<BotResponse>>;

    async fn bot_response(&self, id: &str) -> Result<Option<BotResponse>>;

    async fn save_bot_response(&self, response: &BotResponse) -> Result<()>;

    async fn delete_bot_response(&self, id: &str) -> Result<bool>;

    /// Newest first.
    async fn tickets(&self) -> Result<Vec<Ticket>>;

    async fn ticket(&self, id: &str) -> Result<Option<Ticket>>;

    async fn save_ticket(&self, ticket: &Ticket) -> Result<()>;

    /// Newest first.
    async fn agents(&self) -> Result<Vec<AgentProfile>>;

    async fn agent(&self, id: &str) -> Result<Option<AgentProfile>>;

    async fn agent_for_token(&self, token: &str) -> Result<Option<AgentProfile>>;

    async fn dashboard_stats(&self) -> Result<DashboardStats>;
}
