//! Telegram Bot API boundary.
//!
//! `ChatClient` models exactly the calls the executor makes against the chat
//! platform; `BotApi` is the thin HTTP implementation. The dispatcher and
//! the service only see the trait, so tests run against in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const API_BASE: &str = "https://api.telegram.org";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Update kinds the executor subscribes to.
pub const ALLOWED_UPDATES: &[&str] = &["message", "callback_query"];

/// Chat API errors.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("telegram http error: {0}")]
    Http(String),
    #[error("telegram api error: {method}: {description}")]
    Api { method: String, description: String },
    #[error("telegram response decode error: {0}")]
    Decode(String),
}

/// One incoming chat event.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub voice: Option<Voice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Inline-button press event.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    /// Anchor message the button is attached to.
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Voice {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyParameters {
    pub message_id: i64,
    pub allow_sending_without_reply: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageParams {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_parameters: Option<ReplyParameters>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditMessageTextParams {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

/// The chat platform operations the executor relies on.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_message(&self, params: SendMessageParams) -> Result<SentMessage, ChatError>;

    async fn edit_message_text(&self, params: EditMessageTextParams) -> Result<(), ChatError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError>;

    /// Acknowledge a callback query, optionally showing `text` to the user.
    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: &str,
    ) -> Result<(), ChatError>;

    async fn set_webhook(&self, url: &str, secret_token: &str) -> Result<(), ChatError>;

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), ChatError>;

    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, ChatError>;

    async fn get_file(&self, file_id: &str) -> Result<FileInfo, ChatError>;

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, ChatError>;
}

/// Telegram Bot API client over HTTP.
pub struct BotApi {
    client: reqwest::Client,
    base_url: String,
    file_url: String,
}

impl BotApi {
    pub fn new(token: &str) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{API_BASE}/bot{token}"),
            file_url: format!("{API_BASE}/file/bot{token}"),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &impl Serialize,
    ) -> Result<T, ChatError> {
        #[derive(Deserialize)]
        struct Envelope<T> {
            ok: bool,
            #[serde(default = "Option::default")]
            result: Option<T>,
            #[serde(default)]
            description: Option<String>,
        }

        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| ChatError::Http(e.to_string()))?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        if !envelope.ok {
            return Err(ChatError::Api {
                method: method.to_string(),
                description: envelope
                    .description
                    .unwrap_or_else(|| "request was not ok".to_string()),
            });
        }
        envelope.result.ok_or_else(|| ChatError::Api {
            method: method.to_string(),
            description: "missing result".to_string(),
        })
    }
}

#[async_trait]
impl ChatClient for BotApi {
    async fn send_message(&self, params: SendMessageParams) -> Result<SentMessage, ChatError> {
        self.call("sendMessage", &params).await
    }

    async fn edit_message_text(&self, params: EditMessageTextParams) -> Result<(), ChatError> {
        // Telegram returns the edited message; only success matters here.
        self.call::<serde_json::Value>("editMessageText", &params)
            .await
            .map(|_| ())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
        self.call::<bool>(
            "deleteMessage",
            &serde_json::json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
        .map(|_| ())
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: &str,
    ) -> Result<(), ChatError> {
        let mut params = serde_json::json!({ "callback_query_id": callback_query_id });
        if !text.trim().is_empty() {
            params["text"] = serde_json::Value::String(text.to_string());
        }
        self.call::<bool>("answerCallbackQuery", &params)
            .await
            .map(|_| ())
    }

    async fn set_webhook(&self, url: &str, secret_token: &str) -> Result<(), ChatError> {
        self.call::<bool>(
            "setWebhook",
            &serde_json::json!({
                "url": url,
                "secret_token": secret_token,
                "allowed_updates": ALLOWED_UPDATES,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), ChatError> {
        self.call::<bool>(
            "deleteWebhook",
            &serde_json::json!({ "drop_pending_updates": drop_pending_updates }),
        )
        .await
        .map(|_| ())
    }

    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, ChatError> {
        #[derive(Serialize)]
        struct GetUpdatesParams {
            #[serde(skip_serializing_if = "Option::is_none")]
            offset: Option<i64>,
            timeout: u64,
            allowed_updates: &'static [&'static str],
        }

        self.call(
            "getUpdates",
            &GetUpdatesParams {
                offset,
                timeout: timeout_secs,
                allowed_updates: ALLOWED_UPDATES,
            },
        )
        .await
    }

    async fn get_file(&self, file_id: &str) -> Result<FileInfo, ChatError> {
        self.call("getFile", &serde_json::json!({ "file_id": file_id }))
            .await
    }

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, ChatError> {
        let url = format!("{}/{}", self.file_url, file_path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChatError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChatError::Http(format!(
                "file download failed with status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChatError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_decodes_callback_query() {
        let raw = serde_json::json!({
            "update_id": 5,
            "callback_query": {
                "id": "cb-1",
                "data": "option:r1|0",
                "message": { "message_id": 9, "chat": { "id": 42 } }
            }
        });
        let update: Update = serde_json::from_value(raw).unwrap();
        let query = update.callback_query.unwrap();
        assert_eq!(query.id, "cb-1");
        assert_eq!(query.data.as_deref(), Some("option:r1|0"));
        assert_eq!(query.message.unwrap().chat.id, 42);
    }

    #[test]
    fn test_update_decodes_voice_message() {
        let raw = serde_json::json!({
            "update_id": 6,
            "message": {
                "message_id": 10,
                "chat": { "id": 42 },
                "voice": { "file_id": "voice-file", "duration": 3 }
            }
        });
        let update: Update = serde_json::from_value(raw).unwrap();
        let message = update.message.unwrap();
        assert!(message.text.is_none());
        assert_eq!(message.voice.unwrap().file_id, "voice-file");
    }

    #[test]
    fn test_send_message_params_skip_empty_fields() {
        let params = SendMessageParams {
            chat_id: 1,
            text: "hi".to_string(),
            parse_mode: None,
            reply_markup: None,
            reply_parameters: None,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "chat_id": 1, "text": "hi" })
        );
    }
}
