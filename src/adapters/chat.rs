//! Telegram Chat Adapter
//!
//! Bot API transport: outbound messages go through `sendMessage`,
//! inbound traffic arrives via `getUpdates` long polling. Link entities
//! are resolved against the message text so downstream code sees plain
//! URL strings.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ports::messaging::{InboundMessage, MessageTarget, Messaging, MessagingError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    text: Option<String>,
    from: Option<User>,
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Entity {
    #[serde(rename = "type")]
    kind: String,
    offset: usize,
    length: usize,
    url: Option<String>,
}

pub struct TelegramChat {
    client: reqwest::Client,
    base_url: String,
    offset: AtomicI64,
}

impl TelegramChat {
    pub fn new(token: &str) -> Result<Self, MessagingError> {
        Self::with_api_url("https://api.telegram.org", token)
    }

    pub fn with_api_url(api_url: &str, token: &str) -> Result<Self, MessagingError> {
        if token.is_empty() {
            return Err(MessagingError::SendFailed(
                "bot token not configured".to_string(),
            ));
        }
        // Long-poll requests hold the connection open for POLL_TIMEOUT_SECS,
        // so the client timeout has to exceed it.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS) + HTTP_TIMEOUT)
            .build()
            .map_err(|e| MessagingError::ConnectionLost(e.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url, token),
            offset: AtomicI64::new(0),
        })
    }

    /// Poll for updates and forward each text message to `tx`. Returns
    /// `ConnectionLost` on transport failure so the caller can decide on
    /// reconnect backoff; never returns `Ok` while the channel is open.
    pub async fn run_updates(
        &self,
        tx: mpsc::Sender<InboundMessage>,
    ) -> Result<(), MessagingError> {
        loop {
            let offset = self.offset.load(Ordering::SeqCst);
            let url = format!(
                "{}/getUpdates?timeout={}&offset={}",
                self.base_url, POLL_TIMEOUT_SECS, offset
            );
            let response: UpdatesResponse = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| MessagingError::ConnectionLost(e.to_string()))?
                .json()
                .await
                .map_err(|e| MessagingError::ConnectionLost(e.to_string()))?;

            if !response.ok {
                return Err(MessagingError::ConnectionLost(
                    "getUpdates returned ok=false".to_string(),
                ));
            }

            for update in response.result {
                self.offset.store(update.update_id + 1, Ordering::SeqCst);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text else { continue };
                let Some(from) = message.from else { continue };

                let entity_urls = extract_entity_urls(&text, &message.entities);
                debug!(sender = from.id, "inbound chat message");
                let inbound = InboundMessage {
                    sender: from.id,
                    sender_username: from.username,
                    text,
                    entity_urls,
                };
                if tx.send(inbound).await.is_err() {
                    // Receiver dropped, the engine is shutting down.
                    return Ok(());
                }
            }
        }
    }
}

/// URLs from message entities: `text_link` carries the URL directly,
/// `url` entities are slices of the body text. Telegram offsets are in
/// UTF-16 code units.
fn extract_entity_urls(text: &str, entities: &[Entity]) -> Vec<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    entities
        .iter()
        .filter_map(|entity| match entity.kind.as_str() {
            "text_link" => entity.url.clone(),
            "url" => {
                let end = (entity.offset + entity.length).min(units.len());
                let slice = units.get(entity.offset..end)?;
                String::from_utf16(slice).ok()
            }
            _ => None,
        })
        .collect()
}

#[async_trait]
impl Messaging for TelegramChat {
    async fn send(&self, target: &MessageTarget, text: &str) -> Result<(), MessagingError> {
        let chat_id = match target {
            MessageTarget::ChatId(id) => json!(id),
            MessageTarget::Username(name) => json!(format!("@{}", name)),
        };
        let url = format!("{}/sendMessage", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| MessagingError::SendFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "sendMessage rejected");
            return Err(MessagingError::SendFailed(format!(
                "status {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}
