//! Keyword-triggered canned replies.
//!
//! Matching is a case-insensitive substring test against the inbound content.
//! When several keywords match, the longest keyword wins; ties go to the
//! oldest bot response, then to the smaller id.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::HubSettings;
use crate::evolution::OutboundPayload;
use crate::types::{AppState, BotResponse};

pub fn find_match<'a>(responses: &'a [BotResponse], content: &str) -> Option<&'a BotResponse> {
    let haystack = content.to_lowercase();
    let mut candidates = responses
        .iter()
        .filter(|r| r.is_active && !r.keyword.trim().is_empty())
        .collect::<Vec<_>>();
    candidates.sort_by(|a, b| {
        b.keyword
            .trim()
            .chars()
            .count()
            .cmp(&a.keyword.trim().chars().count())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
        .into_iter()
        .find(|r| haystack.contains(&r.keyword.trim().to_lowercase()))
}

/// A canned reply already recorded as a bot message, waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoReply {
    pub conversation_id: String,
    pub phone: String,
    pub text: String,
}

/// Delivers the reply on its own task. The webhook never waits for it and
/// never learns whether it failed.
pub fn dispatch(state: Arc<AppState>, reply: AutoReply) -> JoinHandle<()> {
    tokio::spawn(async move {
        deliver(&state, &reply).await;
    })
}

pub async fn deliver(state: &Arc<AppState>, reply: &AutoReply) {
    let settings = match state.store.settings().await {
        Ok(rows) => HubSettings::from_rows(&rows),
        Err(err) => {
            tracing::warn!(conversation_id = %reply.conversation_id, error = %err, "auto-reply skipped: settings unavailable");
            return;
        }
    };
    let credentials = match settings.gateway() {
        Ok(credentials) => credentials,
        Err(err) => {
            tracing::warn!(conversation_id = %reply.conversation_id, error = %err, "auto-reply not delivered");
            return;
        }
    };

    let payload = OutboundPayload::text(&reply.phone, &reply.text);
    match state.gateway.send(&credentials, &payload).await {
        Ok(_) => {
            tracing::info!(conversation_id = %reply.conversation_id, "auto-reply delivered");
        }
        Err(err) => {
            tracing::warn!(conversation_id = %reply.conversation_id, error = %err, "auto-reply delivery failed");
        }
    }
}
