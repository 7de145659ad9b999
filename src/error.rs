use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    ConfigMissing(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::ConfigMissing(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Failure envelope for the edge functions. Every error kind is a 500, except
/// a rejected caller which stays a 401.
#[derive(Debug)]
pub struct EdgeFailure(pub AppError);

impl From<AppError> for EdgeFailure {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for EdgeFailure {
    fn into_response(self) -> Response {
        if matches!(self.0, AppError::Unauthorized(_)) {
            return self.0.into_response();
        }
        tracing::error!(error = %self.0, "edge function failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_by_kind() {
        assert_eq!(
            AppError::NotFound("conversation not found".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InvalidInput("title is required".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Upstream("gateway rejected".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::ConfigMissing("no api url".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn edge_failures_are_always_500() {
        let response = EdgeFailure(AppError::NotFound("conversation not found".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = EdgeFailure(AppError::InvalidInput("no file".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn rejected_callers_are_401_everywhere() {
        let err = AppError::Unauthorized("missing bearer token".into());
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let response = EdgeFailure(err).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
