//! Wire types and HTTP client for the Evolution WhatsApp gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::GatewayCredentials;
use crate::error::{AppError, Result};
use crate::types::MessageKind;

const JID_SUFFIX: &str = "@s.whatsapp.net";

pub const IMAGE_PLACEHOLDER: &str = "[Imagem]";
pub const DOCUMENT_PLACEHOLDER: &str = "[Documento]";
pub const AUDIO_PLACEHOLDER: &str = "[Áudio]";

pub fn is_upsert_event(event: &str) -> bool {
    let event = event.trim();
    event == "messages.upsert" || event == "MESSAGES_UPSERT"
}

pub fn phone_from_jid(remote_jid: &str) -> String {
    let jid = remote_jid.trim();
    jid.strip_suffix(JID_SUFFIX).unwrap_or(jid).to_string()
}

/// True when the event echoes a message this instance sent. Read before the
/// full decode so echoes with partial keys are still ignored.
pub fn is_own_message(data: &Value) -> bool {
    data.pointer("/key/fromMe")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertData {
    key: MessageKey,
    #[serde(default)]
    push_name: Option<String>,
    #[serde(default)]
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageKey {
    remote_jid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    conversation: Option<String>,
    #[serde(default)]
    extended_text_message: Option<TextBody>,
    #[serde(default)]
    image_message: Option<MediaBody>,
    #[serde(default)]
    document_message: Option<MediaBody>,
    #[serde(default)]
    audio_message: Option<MediaBody>,
}

#[derive(Debug, Default, Deserialize)]
struct TextBody {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaBody {
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Message body variants, in the precedence the gateway payload is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    ExtendedText(String),
    Image {
        caption: Option<String>,
        url: Option<String>,
    },
    Document {
        caption: Option<String>,
        url: Option<String>,
    },
    Audio {
        url: Option<String>,
    },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContent {
    pub content: String,
    pub kind: MessageKind,
    pub file_url: Option<String>,
}

impl InboundContent {
    fn classify(message: Option<WireMessage>) -> Self {
        let Some(message) = message else {
            return Self::Unknown;
        };
        if let Some(text) = message.conversation.filter(|t| !t.is_empty()) {
            return Self::Text(text);
        }
        if let Some(body) = message.extended_text_message {
            return Self::ExtendedText(body.text.unwrap_or_default());
        }
        if let Some(body) = message.image_message {
            return Self::Image {
                caption: body.caption,
                url: body.url,
            };
        }
        if let Some(body) = message.document_message {
            return Self::Document {
                caption: body.caption,
                url: body.url,
            };
        }
        if let Some(body) = message.audio_message {
            return Self::Audio { url: body.url };
        }
        Self::Unknown
    }

    pub fn normalize(self) -> NormalizedContent {
        match self {
            Self::Text(text) | Self::ExtendedText(text) => NormalizedContent {
                content: text,
                kind: MessageKind::Text,
                file_url: None,
            },
            Self::Image { caption, url } => NormalizedContent {
                content: caption_or(caption, IMAGE_PLACEHOLDER),
                kind: MessageKind::Image,
                file_url: url,
            },
            Self::Document { caption, url } => NormalizedContent {
                content: caption_or(caption, DOCUMENT_PLACEHOLDER),
                kind: MessageKind::Document,
                file_url: url,
            },
            Self::Audio { url } => NormalizedContent {
                content: AUDIO_PLACEHOLDER.to_string(),
                kind: MessageKind::Audio,
                file_url: url,
            },
            Self::Unknown => NormalizedContent {
                content: String::new(),
                kind: MessageKind::Text,
                file_url: None,
            },
        }
    }
}

fn caption_or(caption: Option<String>, placeholder: &str) -> String {
    caption
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| placeholder.to_string())
}

/// A `messages.upsert` event decoded once at the webhook boundary.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub phone: String,
    pub display_name: String,
    pub content: InboundContent,
}

impl InboundMessage {
    pub fn decode(data: Value) -> Result<Self> {
        let data: UpsertData = serde_json::from_value(data)
            .map_err(|e| AppError::InvalidInput(format!("malformed message event: {e}")))?;
        let phone = phone_from_jid(&data.key.remote_jid);
        let display_name = data
            .push_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| phone.clone());
        Ok(Self {
            phone,
            display_name,
            content: InboundContent::classify(data.message),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundPayload {
    Text {
        number: String,
        text: String,
    },
    Media {
        number: String,
        mediatype: String,
        media: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

impl OutboundPayload {
    pub fn text(number: &str, text: &str) -> Self {
        Self::Text {
            number: number.to_string(),
            text: text.to_string(),
        }
    }

    pub fn for_message(
        number: &str,
        kind: MessageKind,
        content: &str,
        file_url: Option<&str>,
    ) -> Result<Self> {
        match kind {
            MessageKind::Text => Ok(Self::text(number, content)),
            MessageKind::Image | MessageKind::Document => {
                let media = file_url
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| {
                        AppError::InvalidInput(format!("{} messages need a fileUrl", kind.as_str()))
                    })?;
                Ok(Self::Media {
                    number: number.to_string(),
                    mediatype: kind.as_str().to_string(),
                    media: media.to_string(),
                    caption: Some(content.to_string()).filter(|c| !c.is_empty()),
                })
            }
            MessageKind::Audio => Err(AppError::InvalidInput(
                "audio messages cannot be sent".to_string(),
            )),
        }
    }

    pub fn number(&self) -> &str {
        match self {
            Self::Text { number, .. } | Self::Media { number, .. } => number,
        }
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Delivers one message. Non-2xx answers are `AppError::Upstream`.
    async fn send(&self, credentials: &GatewayCredentials, payload: &OutboundPayload)
        -> Result<Value>;
}

pub struct EvolutionClient {
    http: reqwest::Client,
    instance: String,
}

impl EvolutionClient {
    pub fn new(instance: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            instance: instance.to_string(),
        })
    }

    fn send_url(&self, api_url: &str) -> String {
        format!(
            "{}/message/sendText/{}",
            api_url.trim_end_matches('/'),
            self.instance
        )
    }
}

#[async_trait]
impl Gateway for EvolutionClient {
    async fn send(
        &self,
        credentials: &GatewayCredentials,
        payload: &OutboundPayload,
    ) -> Result<Value> {
        let response = self
            .http
            .post(self.send_url(&credentials.api_url))
            .header("apikey", &credentials.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let raw_body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(status = %status, error = %err, "evolution api body unreadable");
                String::new()
            }
        };
        if !status.is_success() {
            tracing::warn!(status = %status, body = %raw_body, "evolution api rejected message");
            return Err(AppError::Upstream(format!(
                "failed to send message: gateway responded {}",
                status.as_u16()
            )));
        }

        tracing::debug!(number = payload.number(), "evolution api accepted message");
        Ok(gateway_body(raw_body))
    }
}

/// The gateway's answer as JSON. A 2xx that is not JSON still counts as
/// delivered and comes back as `{ "raw": body }`.
fn gateway_body(raw_body: String) -> Value {
    match serde_json::from_str::<Value>(&raw_body) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "evolution api answered with non-json body");
            json!({ "raw": raw_body })
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every payload and answers with a fixed HTTP status.
    pub struct RecordingGateway {
        pub status: u16,
        pub sent: Mutex<Vec<OutboundPayload>>,
    }

    impl RecordingGateway {
        pub fn accepting() -> Self {
            Self::with_status(201)
        }

        pub fn with_status(status: u16) -> Self {
            Self {
                status,
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn sent(&self) -> Vec<OutboundPayload> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn send(
            &self,
            _credentials: &GatewayCredentials,
            payload: &OutboundPayload,
        ) -> Result<Value> {
            self.sent.lock().unwrap().push(payload.clone());
            if (200..300).contains(&self.status) {
                Ok(json!({ "key": { "id": "BAE5F0" }, "status": "PENDING" }))
            } else {
                Err(AppError::Upstream(format!(
                    "failed to send message: gateway responded {}",
                    self.status
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(message: Value) -> Value {
        json!({
            "key": { "fromMe": false, "remoteJid": "5511987654321@s.whatsapp.net" },
            "pushName": "Maria",
            "message": message
        })
    }

    #[test]
    fn strips_jid_suffix() {
        assert_eq!(phone_from_jid("5511987654321@s.whatsapp.net"), "5511987654321");
        assert_eq!(phone_from_jid("5511987654321"), "5511987654321");
    }

    #[test]
    fn accepts_both_upsert_spellings() {
        assert!(is_upsert_event("messages.upsert"));
        assert!(is_upsert_event("MESSAGES_UPSERT"));
        assert!(!is_upsert_event("connection.update"));
    }

    #[test]
    fn push_name_falls_back_to_phone() {
        let data = json!({
            "key": { "fromMe": false, "remoteJid": "5511900000000@s.whatsapp.net" },
            "message": { "conversation": "oi" }
        });
        let inbound = InboundMessage::decode(data).unwrap();
        assert_eq!(inbound.display_name, "5511900000000");
        assert_eq!(inbound.phone, "5511900000000");
    }

    #[test]
    fn plain_text_wins_over_other_variants() {
        let inbound = InboundMessage::decode(upsert(json!({
            "conversation": "Olá",
            "extendedTextMessage": { "text": "ignored" },
            "imageMessage": { "caption": "ignored", "url": "https://mmg.whatsapp.net/x" }
        })))
        .unwrap();
        assert_eq!(inbound.content, InboundContent::Text("Olá".into()));
    }

    #[test]
    fn empty_plain_text_falls_through_to_extended_text() {
        let inbound = InboundMessage::decode(upsert(json!({
            "conversation": "",
            "extendedTextMessage": { "text": "link https://example.com" }
        })))
        .unwrap();
        assert_eq!(
            inbound.content.normalize(),
            NormalizedContent {
                content: "link https://example.com".into(),
                kind: MessageKind::Text,
                file_url: None,
            }
        );
    }

    #[test]
    fn media_variants_use_placeholders_without_caption() {
        let image = InboundMessage::decode(upsert(json!({
            "imageMessage": { "url": "https://mmg.whatsapp.net/img" }
        })))
        .unwrap()
        .content
        .normalize();
        assert_eq!(image.content, IMAGE_PLACEHOLDER);
        assert_eq!(image.kind, MessageKind::Image);
        assert_eq!(image.file_url.as_deref(), Some("https://mmg.whatsapp.net/img"));

        let document = InboundMessage::decode(upsert(json!({
            "documentMessage": { "caption": "boleto", "url": "https://mmg.whatsapp.net/doc" }
        })))
        .unwrap()
        .content
        .normalize();
        assert_eq!(document.content, "boleto");
        assert_eq!(document.kind, MessageKind::Document);

        let audio = InboundMessage::decode(upsert(json!({
            "audioMessage": { "url": "https://mmg.whatsapp.net/ogg" }
        })))
        .unwrap()
        .content
        .normalize();
        assert_eq!(audio.content, AUDIO_PLACEHOLDER);
        assert_eq!(audio.kind, MessageKind::Audio);
    }

    #[test]
    fn unrecognized_body_is_empty_text() {
        let inbound = InboundMessage::decode(upsert(json!({
            "stickerMessage": { "url": "https://mmg.whatsapp.net/webp" }
        })))
        .unwrap();
        assert_eq!(inbound.content, InboundContent::Unknown);
        let normalized = inbound.content.normalize();
        assert_eq!(normalized.content, "");
        assert_eq!(normalized.kind, MessageKind::Text);
    }

    #[test]
    fn missing_key_is_rejected() {
        let err = InboundMessage::decode(json!({ "message": { "conversation": "oi" } }))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn text_payload_shape() {
        let payload =
            OutboundPayload::for_message("5511987654321", MessageKind::Text, "Olá", None).unwrap();
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({ "number": "5511987654321", "text": "Olá" })
        );
    }

    #[test]
    fn media_payload_shape() {
        let with_caption = OutboundPayload::for_message(
            "5511987654321",
            MessageKind::Image,
            "segue a foto",
            Some("data:image/png;base64,iVBORw0KGgo="),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&with_caption).unwrap(),
            json!({
                "number": "5511987654321",
                "mediatype": "image",
                "media": "data:image/png;base64,iVBORw0KGgo=",
                "caption": "segue a foto"
            })
        );

        let without_caption = OutboundPayload::for_message(
            "5511987654321",
            MessageKind::Document,
            "",
            Some("https://files.example.com/contrato.pdf"),
        )
        .unwrap();
        assert!(serde_json::to_value(&without_caption)
            .unwrap()
            .get("caption")
            .is_none());
    }

    #[test]
    fn media_payload_needs_file() {
        let err = OutboundPayload::for_message("5511987654321", MessageKind::Image, "x", None)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn own_messages_are_spotted_without_a_jid() {
        assert!(is_own_message(&json!({ "key": { "fromMe": true } })));
        assert!(!is_own_message(&json!({ "key": { "fromMe": false } })));
        assert!(!is_own_message(&json!({ "message": { "conversation": "oi" } })));
        assert!(!is_own_message(&json!({ "key": { "fromMe": "true" } })));
    }

    #[test]
    fn gateway_body_keeps_non_json_answers() {
        assert_eq!(
            gateway_body(r#"{"status":"PENDING"}"#.to_string()),
            json!({ "status": "PENDING" })
        );
        assert_eq!(gateway_body("queued".to_string()), json!({ "raw": "queued" }));
        assert_eq!(gateway_body(String::new()), json!({ "raw": "" }));
    }

    #[test]
    fn send_url_uses_instance() {
        let client = EvolutionClient::new("iatende").unwrap();
        assert_eq!(
            client.send_url("https://evo.example.com/"),
            "https://evo.example.com/message/sendText/iatende"
        );
    }
}
