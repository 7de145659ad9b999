use std::env;

use crate::error::{AppError, Result};
use crate::types::Setting;

pub const EVOLUTION_API_URL: &str = "evolution_api_url";
pub const EVOLUTION_API_KEY: &str = "evolution_api_key";
pub const BOT_ENABLED: &str = "bot_enabled";
pub const BOT_GREETING: &str = "bot_greeting";

const DEFAULT_INSTANCE: &str = "iatende";
const DEFAULT_DATABASE: &str = "evo_talk_hub";
const DEFAULT_PORT: u16 = 4000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    pub evolution_instance: String,
    pub log_format: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // First non-blank value among `keys`.
        let var = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let database_url = var(&["DATABASE_URL"]).unwrap_or_else(|| {
            let host = var(&["POSTGRES_HOST", "PGHOST"]).unwrap_or_else(|| "localhost".into());
            let port = var(&["POSTGRES_PORT", "PGPORT"]).unwrap_or_else(|| "5432".into());
            let user = var(&["POSTGRES_USER", "PGUSER"]).unwrap_or_else(|| "postgres".into());
            let password =
                var(&["POSTGRES_PASSWORD", "PGPASSWORD"]).unwrap_or_else(|| "postgres".into());
            let db = var(&["POSTGRES_DB", "PGDATABASE"]).unwrap_or_else(|| DEFAULT_DATABASE.into());
            format!("postgres://{user}:{password}@{host}:{port}/{db}")
        });

        Self {
            port: var(&["PORT"])
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            database_url,
            evolution_instance: var(&["EVOLUTION_INSTANCE"])
                .unwrap_or_else(|| DEFAULT_INSTANCE.to_string()),
            log_format: var(&["LOG_FORMAT"]).unwrap_or_else(|| "pretty".to_string()),
        }
    }
}

/// Settings rows folded into typed values. Loaded once per request.
#[derive(Debug, Clone, Default)]
pub struct HubSettings {
    pub evolution_api_url: Option<String>,
    pub evolution_api_key: Option<String>,
    pub bot_enabled: bool,
    /// Kept for the settings form; nothing sends it yet.
    pub bot_greeting: String,
}

/// Gateway base URL and credential, both present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCredentials {
    pub api_url: String,
    pub api_key: String,
}

impl HubSettings {
    pub fn from_rows(rows: &[Setting]) -> Self {
        let mut settings = Self {
            bot_enabled: true,
            ..Self::default()
        };
        for row in rows {
            let value = row.value.as_deref().map(str::trim).unwrap_or("");
            match row.key.as_str() {
                EVOLUTION_API_URL => settings.evolution_api_url = non_empty(value),
                EVOLUTION_API_KEY => settings.evolution_api_key = non_empty(value),
                BOT_ENABLED => settings.bot_enabled = parse_toggle(value),
                BOT_GREETING => settings.bot_greeting = value.to_string(),
                _ => {}
            }
        }
        settings
    }

    pub fn gateway(&self) -> Result<GatewayCredentials> {
        match (&self.evolution_api_url, &self.evolution_api_key) {
            (Some(url), Some(key)) => Ok(GatewayCredentials {
                api_url: url.trim_end_matches('/').to_string(),
                api_key: key.clone(),
            }),
            _ => Err(AppError::ConfigMissing(
                "evolution api is not configured".to_string(),
            )),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// Blank counts as enabled.
fn parse_toggle(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "false" | "0" | "off" | "no"
    )
}
