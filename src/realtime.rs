use std::{
    collections::HashSet,
    sync::{atomic::Ordering, Arc},
};

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::auth::auth_agent_from_token;
use crate::types::{AppState, Conversation, EventEnvelopeIn, Message, RealtimeState};
use crate::util::bearer_token;

fn event_payload<T: Serialize>(event: &str, data: T) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

async fn emit_to_clients<T: Serialize>(
    state: &Arc<AppState>,
    client_ids: &[usize],
    event: &str,
    data: T,
) {
    let Some(payload) = event_payload(event, data) else {
        return;
    };

    let senders = {
        let rt = state.realtime.lock().await;
        client_ids
            .iter()
            .filter_map(|id| rt.clients.get(id).cloned())
            .collect::<Vec<_>>()
    };

    for sender in senders {
        let _ = sender.send(payload.clone());
    }
}

/// Pushes a freshly stored message to everyone watching its conversation and
/// to every joined agent.
pub async fn emit_message(state: &Arc<AppState>, message: &Message) {
    let recipients = {
        let rt = state.realtime.lock().await;
        let mut ids = HashSet::new();
        if let Some(watchers) = rt.conversation_watchers.get(&message.conversation_id) {
            ids.extend(watchers.iter().copied());
        }
        ids.extend(rt.agents.iter().copied());
        ids.into_iter().collect::<Vec<_>>()
    };
    emit_to_clients(state, &recipients, "message:new", message).await;
}

pub async fn emit_conversation(state: &Arc<AppState>, conversation: &Conversation) {
    let agents = {
        let rt = state.realtime.lock().await;
        rt.agents.iter().copied().collect::<Vec<_>>()
    };
    emit_to_clients(state, &agents, "conversation:updated", conversation).await;
}

pub async fn register_client(state: &Arc<AppState>) -> (usize, mpsc::UnboundedReceiver<String>) {
    let client_id = state.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let mut rt = state.realtime.lock().await;
    rt.clients.insert(client_id, tx);
    (client_id, rx)
}

fn drop_watcher(rt: &mut RealtimeState, conversation_id: &str, client_id: usize) {
    if let Some(set) = rt.conversation_watchers.get_mut(conversation_id) {
        set.remove(&client_id);
        if set.is_empty() {
            rt.conversation_watchers.remove(conversation_id);
        }
    }
}

pub async fn watch_conversation(state: &Arc<AppState>, client_id: usize, conversation_id: &str) {
    let mut rt = state.realtime.lock().await;
    if let Some(previous) = rt
        .watched_conversation
        .insert(client_id, conversation_id.to_string())
    {
        drop_watcher(&mut rt, &previous, client_id);
    }
    rt.conversation_watchers
        .entry(conversation_id.to_string())
        .or_default()
        .insert(client_id);
}

pub async fn unwatch_conversation(state: &Arc<AppState>, client_id: usize) {
    let mut rt = state.realtime.lock().await;
    if let Some(previous) = rt.watched_conversation.remove(&client_id) {
        drop_watcher(&mut rt, &previous, client_id);
    }
}

pub async fn join_agent(state: &Arc<AppState>, client_id: usize) {
    let mut rt = state.realtime.lock().await;
    rt.agents.insert(client_id);
}

pub async fn unregister_client(state: &Arc<AppState>, client_id: usize) {
    unwatch_conversation(state, client_id).await;
    let mut rt = state.realtime.lock().await;
    rt.clients.remove(&client_id);
    rt.agents.remove(&client_id);
}

#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Browsers cannot set headers on a socket, so `?token=` is accepted too.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsAuthQuery>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = query.token.or_else(|| bearer_token(&headers));
    let agent = match auth_agent_from_token(&state, token).await {
        Ok(agent) => agent,
        Err(err) => return err.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    tracing::debug!(agent_id = %agent.id, "realtime upgrade accepted");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (client_id, mut rx) = register_client(&state).await;
    tracing::debug!(client_id, "realtime client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_receiver.next().await {
        let text = match message {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let Ok(envelope) = serde_json::from_str::<EventEnvelopeIn>(&text) else {
            continue;
        };

        match envelope.event.as_str() {
            "conversation:watch" => {
                if let Some(conversation_id) = envelope
                    .data
                    .get("conversationId")
                    .and_then(Value::as_str)
                {
                    watch_conversation(&state, client_id, conversation_id).await;
                }
            }
            "conversation:unwatch" => unwatch_conversation(&state, client_id).await,
            "agent:join" => join_agent(&state, client_id).await,
            other => tracing::debug!(client_id, event = other, "ignoring realtime event"),
        }
    }

    unregister_client(&state, client_id).await;
    send_task.abort();
    tracing::debug!(client_id, "realtime client disconnected");
}
