use std::sync::Arc;

use axum::http::HeaderMap;

use crate::error::{AppError, Result};
use crate::types::{AgentProfile, AppState};
use crate::util::bearer_token;

/// Resolves the calling agent or answers 401.
pub async fn auth_agent_from_headers(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<AgentProfile> {
    auth_agent_from_token(state, bearer_token(headers)).await
}

pub async fn auth_agent_from_token(
    state: &Arc<AppState>,
    token: Option<String>,
) -> Result<AgentProfile> {
    let token = token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
    state
        .store
        .agent_for_token(&token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid token".to_string()))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::app::test_state;
    use crate::evolution::testing::RecordingGateway;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn resolves_known_tokens_only() {
        let store = Arc::new(MemoryStore::default());
        let agent_id = store.seed_agent("Ana Souza", "online", "tok-ana");
        let state = test_state(store, Arc::new(RecordingGateway::accepting()));

        let mut headers = HeaderMap::new();
        let err = auth_agent_from_headers(&state, &headers).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        headers.insert("authorization", HeaderValue::from_static("Bearer tok-bruno"));
        let err = auth_agent_from_headers(&state, &headers).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid token");

        headers.insert("authorization", HeaderValue::from_static("Bearer tok-ana"));
        let agent = auth_agent_from_headers(&state, &headers).await.unwrap();
        assert_eq!(agent.id, agent_id);
    }

    #[tokio::test]
    async fn blank_query_token_is_missing() {
        let state = test_state(
            Arc::new(MemoryStore::default()),
            Arc::new(RecordingGateway::accepting()),
        );
        let err = auth_agent_from_token(&state, Some("  ".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing bearer token");
    }
}
