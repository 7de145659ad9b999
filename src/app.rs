use std::sync::{atomic::AtomicUsize, Arc};

use axum::{
    http::{header, HeaderName, Method},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::api;
use crate::config::ServerConfig;
use crate::evolution::EvolutionClient;
use crate::outbound::send_whatsapp_message;
use crate::realtime::ws_handler;
use crate::store::PgStore;
use crate::types::{AppState, RealtimeState};
use crate::upload::upload_whatsapp_media;
use crate::util::now_iso;
use crate::webhook::whatsapp_webhook;

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ])
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/functions/whatsapp-webhook", post(whatsapp_webhook))
        .route("/functions/send-whatsapp-message", post(send_whatsapp_message))
        .route("/functions/upload-whatsapp-media", post(upload_whatsapp_media))
        .route("/api/dashboard/stats", get(api::dashboard_stats))
        .route("/api/conversations", get(api::list_conversations))
        .route("/api/conversations/{conversation_id}", patch(api::patch_conversation))
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(api::list_messages),
        )
        .route("/api/conversations/{conversation_id}/read", post(api::mark_read))
        .route("/api/tickets", get(api::list_tickets).post(api::create_ticket))
        .route("/api/tickets/{ticket_id}", patch(api::update_ticket))
        .route("/api/agents", get(api::list_agents))
        .route("/api/settings", get(api::get_settings).patch(api::patch_settings))
        .route(
            "/api/bot-responses",
            get(api::list_bot_responses).post(api::create_bot_response),
        )
        .route(
            "/api/bot-responses/{response_id}",
            patch(api::update_bot_response).delete(api::delete_bot_response),
        )
        .route("/ws", get(ws_handler))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn init_logging(config: &ServerConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    let config = ServerConfig::from_env();
    init_logging(&config);

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            format!("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars): {e}")
        })?;

    sqlx::migrate!("./migrations").run(&db).await?;

    let state = Arc::new(AppState {
        store: Arc::new(PgStore::new(db)),
        gateway: Arc::new(EvolutionClient::new(&config.evolution_instance)?),
        realtime: Mutex::new(RealtimeState::default()),
        next_client_id: AtomicUsize::new(0),
    });

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        port = config.port,
        instance = %config.evolution_instance,
        "evo talk hub listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
pub fn test_state(
    store: Arc<crate::store::memory::MemoryStore>,
    gateway: Arc<crate::evolution::testing::RecordingGateway>,
) -> Arc<AppState> {
    Arc::new(AppState {
        store,
        gateway,
        realtime: Mutex::new(RealtimeState::default()),
        next_client_id: AtomicUsize::new(0),
    })
}
