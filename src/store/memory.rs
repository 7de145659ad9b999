use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use super::HelpdeskStore;
use crate::config::{EVOLUTION_API_KEY, EVOLUTION_API_URL};
use crate::error::Result;
use crate::types::{
    AgentProfile, BotResponse, Conversation, ConversationStatus, DashboardStats, Message,
    NewConversation, SenderKind, Setting, Ticket, TicketStatus,
};
use crate::util::now_iso;

#[derive(Default)]
struct Tables {
    settings: Vec<Setting>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    bot_responses: Vec<BotResponse>,
    tickets: Vec<Ticket>,
    agents: Vec<AgentProfile>,
    tokens: HashMap<String, String>,
}

/// In-process store for handler tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn with_gateway_settings() -> Self {
        let store = Self::default();
        store.set(EVOLUTION_API_URL, "https://evo.example.com");
        store.set(EVOLUTION_API_KEY, "evo-secret");
        store
    }

    pub fn set(&self, key: &str, value: &str) {
        let mut tables = self.tables.lock().unwrap();
        tables.settings.retain(|s| s.key != key);
        tables.settings.push(Setting {
            key: key.to_string(),
            value: Some(value.to_string()),
            description: None,
            updated_at: now_iso(),
        });
    }

    pub fn seed_bot_response(&self, keyword: &str, response_text: &str, is_active: bool) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_iso();
        self.tables.lock().unwrap().bot_responses.push(BotResponse {
            id: id.clone(),
            keyword: keyword.to_string(),
            response_text: response_text.to_string(),
            is_active,
            category: String::new(),
            created_by: None,
            created_at: now.clone(),
            updated_at: now,
        });
        id
    }

    pub fn seed_conversation(
        &self,
        phone: &str,
        status: ConversationStatus,
        last_message_at: &str,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.tables.lock().unwrap().conversations.push(Conversation {
            id: id.clone(),
            customer_name: phone.to_string(),
            customer_phone: Some(phone.to_string()),
            customer_email: None,
            channel: "whatsapp".to_string(),
            status,
            priority: "normal".to_string(),
            assigned_agent_id: None,
            tags: Vec::new(),
            last_message_at: last_message_at.to_string(),
            created_at: last_message_at.to_string(),
            updated_at: last_message_at.to_string(),
        });
        id
    }

    pub fn seed_agent(&self, full_name: &str, status: &str, token: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_iso();
        let mut tables = self.tables.lock().unwrap();
        tables.agents.push(AgentProfile {
            id: id.clone(),
            full_name: full_name.to_string(),
            avatar_url: String::new(),
            role: "agent".to_string(),
            status: status.to_string(),
            created_at: now.clone(),
            updated_at: now,
        });
        tables.tokens.insert(token.to_string(), id.clone());
        id
    }

    pub fn all_conversations(&self) -> Vec<Conversation> {
        self.tables.lock().unwrap().conversations.clone()
    }

    pub fn all_messages(&self) -> Vec<Message> {
        self.tables.lock().unwrap().messages.clone()
    }
}

#[async_trait]
impl HelpdeskStore for MemoryStore {
    async fn settings(&self) -> Result<Vec<Setting>> {
        Ok(self.tables.lock().unwrap().settings.clone())
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, value);
        Ok(())
    }

    async fn find_or_create_conversation(&self, new: &NewConversation) -> Result<Conversation> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .conversations
            .iter()
            .find(|c| c.customer_phone.as_deref() == Some(new.customer_phone.as_str()))
        {
            return Ok(existing.clone());
        }
        let now = now_iso();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            customer_name: new.customer_name.clone(),
            customer_phone: Some(new.customer_phone.clone()),
            customer_email: None,
            channel: new.channel.clone(),
            status: new.status,
            priority: "normal".to_string(),
            assigned_agent_id: None,
            tags: Vec::new(),
            last_message_at: now.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        tables.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut list = self.tables.lock().unwrap().conversations.clone();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(list)
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(slot) = tables
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            *slot = conversation.clone();
        }
        Ok(())
    }

    async fn touch_conversation(
        &self,
        id: &str,
        at: &str,
        reopen: bool,
    ) -> Result<Option<Conversation>> {
        let mut tables = self.tables.lock().unwrap();
        let Some(conversation) = tables.conversations.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        conversation.last_message_at = at.to_string();
        conversation.updated_at = at.to_string();
        if reopen {
            conversation.status = ConversationStatus::Open;
        }
        Ok(Some(conversation.clone()))
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        self.tables.lock().unwrap().messages.push(message.clone());
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let tables = self.tables.lock().unwrap();
        let mut list = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .map(|mut m| {
                m.sender_name = m.sender_id.as_ref().and_then(|id| {
                    tables
                        .agents
                        .iter()
                        .find(|a| &a.id == id)
                        .map(|a| a.full_name.clone())
                });
                m
            })
            .collect::<Vec<_>>();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn mark_messages_read(&self, conversation_id: &str) -> Result<u64> {
        let mut tables = self.tables.lock().unwrap();
        let mut changed = 0;
        for message in tables.messages.iter_mut().filter(|m| {
            m.conversation_id == conversation_id
                && m.sender_type == SenderKind::Customer
                && !m.is_read
        }) {
            message.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn bot_responses(&self, active_only: bool) -> Result<Vec<BotResponse>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .bot_responses
            .iter()
            .filter(|r| !active_only || r.is_active)
            .cloned()
            .collect())
    }

    async fn bot_response(&self, id: &str) -> Result<Option<BotResponse>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.bot_responses.iter().find(|r| r.id == id).cloned())
    }

    async fn save_bot_response(&self, response: &BotResponse) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.bot_responses.iter_mut().find(|r| r.id == response.id) {
            Some(slot) => *slot = response.clone(),
            None => tables.bot_responses.push(response.clone()),
        }
        Ok(())
    }

    async fn delete_bot_response(&self, id: &str) -> Result<bool> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.bot_responses.len();
        tables.bot_responses.retain(|r| r.id != id);
        Ok(tables.bot_responses.len() != before)
    }

    async fn tickets(&self) -> Result<Vec<Ticket>> {
        let mut list = self.tables.lock().unwrap().tickets.clone();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn ticket(&self, id: &str) -> Result<Option<Ticket>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.tickets.iter().find(|t| t.id == id).cloned())
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.tickets.iter_mut().find(|t| t.id == ticket.id) {
            Some(slot) => *slot = ticket.clone(),
            None => tables.tickets.push(ticket.clone()),
        }
        Ok(())
    }

    async fn agents(&self) -> Result<Vec<AgentProfile>> {
        let mut list = self.tables.lock().unwrap().agents.clone();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn agent(&self, id: &str) -> Result<Option<AgentProfile>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.agents.iter().find(|a| a.id == id).cloned())
    }

    async fn agent_for_token(&self, token: &str) -> Result<Option<AgentProfile>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .tokens
            .get(token)
            .and_then(|id| tables.agents.iter().find(|a| &a.id == id))
            .cloned())
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let tables = self.tables.lock().unwrap();
        Ok(DashboardStats {
            total_conversations: tables.conversations.len() as i64,
            open_tickets: tables
                .tickets
                .iter()
                .filter(|t| t.status == TicketStatus::Open)
                .count() as i64,
            active_agents: tables.agents.iter().filter(|a| a.status == "online").count() as i64,
        })
    }
}
