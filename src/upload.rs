use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use crate::auth::auth_agent_from_headers;
use crate::error::{AppError, EdgeFailure};
use crate::types::AppState;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Echoes the `file` field back as base64. Nothing is stored.
pub async fn upload_whatsapp_media(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, EdgeFailure> {
    auth_agent_from_headers(&state, &headers).await?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("").to_string();
        let content_type = field
            .content_type()
            .map(|v| v.to_string())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidInput(format!("failed to read file: {e}")))?;

        tracing::debug!(name = %name, size = bytes.len(), "media encoded");
        return Ok(Json(json!({
            "success": true,
            "file": {
                "name": name,
                "type": content_type,
                "size": bytes.len(),
                "data": STANDARD.encode(&bytes),
            }
        })));
    }

    Err(AppError::InvalidInput("no file provided".to_string()).into())
}
