//! Agent replies sent through the gateway.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::auth::auth_agent_from_headers;
use crate::config::HubSettings;
use crate::error::{AppError, EdgeFailure, Result};
use crate::evolution::OutboundPayload;
use crate::realtime::{emit_conversation, emit_message};
use crate::types::{AgentProfile, AppState, Message, SendMessageBody, SenderKind};
use crate::util::now_iso;

/// Sends first and records after. A rejected send leaves no message behind.
pub async fn send_message(
    state: &Arc<AppState>,
    agent: Option<&AgentProfile>,
    body: SendMessageBody,
) -> Result<(Message, Value)> {
    let settings = HubSettings::from_rows(&state.store.settings().await?);
    let credentials = settings.gateway()?;

    let conversation = state
        .store
        .conversation(&body.conversation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("conversation not found".to_string()))?;
    let phone = conversation
        .customer_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::NotFound("customer phone not found".to_string()))?;

    let payload = OutboundPayload::for_message(
        phone,
        body.message_type,
        &body.content,
        body.file_url.as_deref(),
    )?;
    let data = state.gateway.send(&credentials, &payload).await?;

    let now = now_iso();
    let message = Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation.id.clone(),
        sender_type: SenderKind::Agent,
        sender_id: agent.map(|a| a.id.clone()),
        sender_name: agent.map(|a| a.full_name.clone()),
        content: body.content,
        message_type: body.message_type,
        file_url: body.file_url,
        is_read: false,
        created_at: now.clone(),
    };
    state.store.insert_message(&message).await?;
    emit_message(state, &message).await;

    if let Some(updated) = state
        .store
        .touch_conversation(&conversation.id, &now, false)
        .await?
    {
        emit_conversation(state, &updated).await;
    }

    tracing::info!(
        conversation_id = %conversation.id,
        kind = message.message_type.as_str(),
        agent_id = message.sender_id.as_deref().unwrap_or("-"),
        "outbound message sent"
    );
    Ok((message, data))
}

pub async fn send_whatsapp_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, EdgeFailure> {
    let agent = auth_agent_from_headers(&state, &headers).await?;
    let body = serde_json::from_value::<SendMessageBody>(body)
        .map_err(|e| AppError::InvalidInput(format!("invalid send request: {e}")))?;

    let (_, data) = send_message(&state, Some(&agent), body).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}
