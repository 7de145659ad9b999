//! Helpdesk REST surface used by the agent UI. Every route needs a signed-in
//! agent.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::auth::auth_agent_from_headers;
use crate::config::{BOT_ENABLED, BOT_GREETING, EVOLUTION_API_KEY, EVOLUTION_API_URL};
use crate::error::{AppError, Result};
use crate::realtime::emit_conversation;
use crate::types::{
    AppState, BotResponse, CreateBotResponseBody, CreateTicketBody, PatchConversationBody,
    PatchSettingsBody, Setting, Ticket, TicketStatus, UpdateBotResponseBody, UpdateTicketBody,
};
use crate::util::now_iso;

const DEFAULT_PRIORITY: &str = "normal";

/// Stands in for the gateway key in settings responses.
pub const REDACTED_SECRET: &str = "********";

fn required(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn optional_id(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Blank unassigns; anything else must name a known agent.
async fn assignee(state: &Arc<AppState>, value: Option<String>) -> Result<Option<String>> {
    let Some(agent_id) = optional_id(value) else {
        return Ok(None);
    };
    if state.store.agent(&agent_id).await?.is_none() {
        return Err(AppError::InvalidInput(format!("unknown agent: {agent_id}")));
    }
    Ok(Some(agent_id))
}

fn redact(mut settings: Vec<Setting>) -> Vec<Setting> {
    settings.sort_by(|a, b| a.key.cmp(&b.key));
    for setting in settings.iter_mut().filter(|s| s.key == EVOLUTION_API_KEY) {
        if setting.value.as_deref().is_some_and(|v| !v.trim().is_empty()) {
            setting.value = Some(REDACTED_SECRET.to_string());
        }
    }
    settings
}

pub async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let stats = state.store.dashboard_stats().await?;
    Ok(Json(stats))
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let conversations = state.store.list_conversations().await?;
    Ok(Json(json!({ "conversations": conversations })))
}

pub async fn patch_conversation(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PatchConversationBody>,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let mut conversation = state
        .store
        .conversation(&conversation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("conversation not found".to_string()))?;

    if let Some(status) = body.status {
        conversation.status = status;
    }
    if let Some(priority) = body.priority {
        conversation.priority = required(&priority, "priority")?;
    }
    if let Some(assigned) = body.assigned_agent_id {
        conversation.assigned_agent_id = assignee(&state, Some(assigned)).await?;
    }
    if let Some(tags) = body.tags {
        let mut cleaned = Vec::new();
        for tag in tags {
            let tag = tag.trim().to_string();
            if !tag.is_empty() && !cleaned.contains(&tag) {
                cleaned.push(tag);
            }
        }
        conversation.tags = cleaned;
    }
    conversation.updated_at = now_iso();
    state.store.save_conversation(&conversation).await?;
    emit_conversation(&state, &conversation).await;

    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn list_messages(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    if state.store.conversation(&conversation_id).await?.is_none() {
        return Err(AppError::NotFound("conversation not found".to_string()));
    }
    let messages = state.store.messages(&conversation_id).await?;
    Ok(Json(json!({ "messages": messages })))
}

pub async fn mark_read(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let updated = state.store.mark_messages_read(&conversation_id).await?;
    Ok(Json(json!({ "ok": true, "updated": updated })))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let tickets = state.store.tickets().await?;
    Ok(Json(json!({ "tickets": tickets })))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateTicketBody>,
) -> Result<impl IntoResponse> {
    let agent = auth_agent_from_headers(&state, &headers).await?;
    let title = required(&body.title, "title")?;
    let conversation_id = optional_id(body.conversation_id);
    if let Some(id) = &conversation_id {
        if state.store.conversation(id).await?.is_none() {
            return Err(AppError::NotFound("conversation not found".to_string()));
        }
    }
    let assigned_agent_id = assignee(&state, body.assigned_agent_id).await?;

    let now = now_iso();
    let ticket = Ticket {
        id: uuid::Uuid::new_v4().to_string(),
        title,
        description: body.description.trim().to_string(),
        status: TicketStatus::Open,
        priority: optional_id(body.priority).unwrap_or_else(|| DEFAULT_PRIORITY.to_string()),
        category: body.category.trim().to_string(),
        conversation_id,
        assigned_agent_id,
        created_by: Some(agent.id),
        resolved_at: None,
        created_at: now.clone(),
        updated_at: now,
    };
    state.store.save_ticket(&ticket).await?;
    tracing::info!(ticket_id = %ticket.id, "ticket created");

    Ok((StatusCode::CREATED, Json(json!({ "ticket": ticket }))))
}

pub async fn update_ticket(
    Path(ticket_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpdateTicketBody>,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let mut ticket = state
        .store
        .ticket(&ticket_id)
        .await?
        .ok_or_else(|| AppError::NotFound("ticket not found".to_string()))?;

    if let Some(title) = body.title {
        ticket.title = required(&title, "title")?;
    }
    if let Some(description) = body.description {
        ticket.description = description.trim().to_string();
    }
    if let Some(priority) = body.priority {
        ticket.priority = required(&priority, "priority")?;
    }
    if let Some(category) = body.category {
        ticket.category = category.trim().to_string();
    }
    if let Some(assigned) = body.assigned_agent_id {
        ticket.assigned_agent_id = assignee(&state, Some(assigned)).await?;
    }
    let now = now_iso();
    if let Some(status) = body.status {
        match status {
            TicketStatus::Resolved if ticket.status != TicketStatus::Resolved => {
                ticket.resolved_at = Some(now.clone());
            }
            TicketStatus::Open | TicketStatus::InProgress => ticket.resolved_at = None,
            _ => {}
        }
        ticket.status = status;
    }
    ticket.updated_at = now;
    state.store.save_ticket(&ticket).await?;

    Ok(Json(json!({ "ticket": ticket })))
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let agents = state.store.agents().await?;
    Ok(Json(json!({ "agents": agents })))
}

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let settings = redact(state.store.settings().await?);
    Ok(Json(json!({ "settings": settings })))
}

pub async fn patch_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PatchSettingsBody>,
) -> Result<impl IntoResponse> {
    let agent = auth_agent_from_headers(&state, &headers).await?;
    let mut changes = Vec::new();
    if let Some(url) = body.evolution_api_url {
        changes.push((EVOLUTION_API_URL, url.trim().to_string()));
    }
    // The settings form echoes the redacted key back untouched.
    if let Some(key) = body.evolution_api_key.filter(|k| k.trim() != REDACTED_SECRET) {
        changes.push((EVOLUTION_API_KEY, key.trim().to_string()));
    }
    if let Some(enabled) = body.bot_enabled {
        changes.push((BOT_ENABLED, enabled.to_string()));
    }
    if let Some(greeting) = body.bot_greeting {
        changes.push((BOT_GREETING, greeting));
    }
    for (key, value) in &changes {
        state.store.upsert_setting(key, value).await?;
    }
    if !changes.is_empty() {
        tracing::info!(
            agent_id = %agent.id,
            keys = ?changes.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            "settings updated"
        );
    }

    let settings = redact(state.store.settings().await?);
    Ok(Json(json!({ "settings": settings })))
}

pub async fn list_bot_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let mut responses = state.store.bot_responses(false).await?;
    responses.sort_by(|a, b| a.keyword.to_lowercase().cmp(&b.keyword.to_lowercase()));
    Ok(Json(json!({ "botResponses": responses })))
}

pub async fn create_bot_response(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBotResponseBody>,
) -> Result<impl IntoResponse> {
    let agent = auth_agent_from_headers(&state, &headers).await?;
    let keyword = required(&body.keyword, "keyword")?;
    let response_text = required(&body.response_text, "responseText")?;

    let now = now_iso();
    let response = BotResponse {
        id: uuid::Uuid::new_v4().to_string(),
        keyword,
        response_text,
        is_active: body.is_active,
        category: body.category.trim().to_string(),
        created_by: Some(agent.id),
        created_at: now.clone(),
        updated_at: now,
    };
    state.store.save_bot_response(&response).await?;

    Ok((StatusCode::CREATED, Json(json!({ "botResponse": response }))))
}

pub async fn update_bot_response(
    Path(response_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpdateBotResponseBody>,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    let mut response = state
        .store
        .bot_response(&response_id)
        .await?
        .ok_or_else(|| AppError::NotFound("bot response not found".to_string()))?;

    if let Some(keyword) = body.keyword {
        response.keyword = required(&keyword, "keyword")?;
    }
    if let Some(text) = body.response_text {
        response.response_text = required(&text, "responseText")?;
    }
    if let Some(category) = body.category {
        response.category = category.trim().to_string();
    }
    if let Some(active) = body.is_active {
        response.is_active = active;
    }
    response.updated_at = now_iso();
    state.store.save_bot_response(&response).await?;

    Ok(Json(json!({ "botResponse": response })))
}

pub async fn delete_bot_response(
    Path(response_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth_agent_from_headers(&state, &headers).await?;
    if !state.store.delete_bot_response(&response_id).await? {
        return Err(AppError::NotFound("bot response not found".to_string()));
    }
    Ok(Json(json!({ "ok": true })))
}
