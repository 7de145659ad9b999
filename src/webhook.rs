//! Inbound gateway events.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::autoreply::{self, AutoReply};
use crate::config::HubSettings;
use crate::error::{AppError, EdgeFailure, Result};
use crate::evolution::{is_own_message, is_upsert_event, InboundMessage};
use crate::realtime::{emit_conversation, emit_message};
use crate::types::{
    AppState, ConversationStatus, EventEnvelopeIn, Message, MessageKind, NewConversation,
    SenderKind,
};
use crate::util::now_iso;

const CHANNEL: &str = "whatsapp";

#[derive(Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Not a message event.
    Skipped,
    /// Echo of a message this account sent.
    Ignored,
    Processed {
        conversation_id: String,
        auto_reply: Option<AutoReply>,
    },
}

pub async fn process_inbound(state: &Arc<AppState>, envelope: EventEnvelopeIn) -> Result<InboundOutcome> {
    if !is_upsert_event(&envelope.event) {
        tracing::debug!(event = %envelope.event, "webhook event skipped");
        return Ok(InboundOutcome::Skipped);
    }

    if is_own_message(&envelope.data) {
        return Ok(InboundOutcome::Ignored);
    }
    let inbound = InboundMessage::decode(envelope.data)?;

    let conversation = state
        .store
        .find_or_create_conversation(&NewConversation {
            customer_name: inbound.display_name.clone(),
            customer_phone: inbound.phone.clone(),
            channel: CHANNEL.to_string(),
            status: ConversationStatus::Open,
        })
        .await?;

    let normalized = inbound.content.normalize();
    let now = now_iso();
    let customer_message = Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation.id.clone(),
        sender_type: SenderKind::Customer,
        sender_id: None,
        sender_name: None,
        content: normalized.content,
        message_type: normalized.kind,
        file_url: normalized.file_url,
        is_read: false,
        created_at: now.clone(),
    };
    state.store.insert_message(&customer_message).await?;
    emit_message(state, &customer_message).await;

    if let Some(updated) = state
        .store
        .touch_conversation(&conversation.id, &now, true)
        .await?
    {
        emit_conversation(state, &updated).await;
    }

    tracing::info!(
        conversation_id = %conversation.id,
        kind = customer_message.message_type.as_str(),
        "inbound message stored"
    );

    let settings = HubSettings::from_rows(&state.store.settings().await?);
    if !settings.bot_enabled {
        return Ok(InboundOutcome::Processed {
            conversation_id: conversation.id,
            auto_reply: None,
        });
    }

    let responses = state.store.bot_responses(true).await?;
    let Some(matched) = autoreply::find_match(&responses, &customer_message.content) else {
        return Ok(InboundOutcome::Processed {
            conversation_id: conversation.id,
            auto_reply: None,
        });
    };

    let bot_message = Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation.id.clone(),
        sender_type: SenderKind::Bot,
        sender_id: None,
        sender_name: None,
        content: matched.response_text.clone(),
        message_type: MessageKind::Text,
        file_url: None,
        is_read: false,
        created_at: now_iso(),
    };
    state.store.insert_message(&bot_message).await?;
    emit_message(state, &bot_message).await;
    tracing::info!(conversation_id = %conversation.id, keyword = %matched.keyword, "auto-reply matched");

    Ok(InboundOutcome::Processed {
        auto_reply: Some(AutoReply {
            conversation_id: conversation.id.clone(),
            phone: inbound.phone,
            text: bot_message.content,
        }),
        conversation_id: conversation.id,
    })
}

pub async fn whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, EdgeFailure> {
    let envelope = serde_json::from_value::<EventEnvelopeIn>(body)
        .map_err(|e| AppError::InvalidInput(format!("malformed webhook event: {e}")))?;

    let response = match process_inbound(&state, envelope).await? {
        InboundOutcome::Skipped => json!({ "success": true }),
        InboundOutcome::Ignored => json!({ "success": true, "ignored": true }),
        InboundOutcome::Processed {
            conversation_id,
            auto_reply,
        } => {
            if let Some(reply) = auto_reply {
                autoreply::dispatch(state.clone(), reply);
            }
            json!({ "success": true, "conversationId": conversation_id })
        }
    };
    Ok(Json(response))
}
