//! Chat update transports.
//!
//! Two variants behind one interface: a long-poll source pulling updates
//! from the Bot API, and a webhook source fed by the inbound HTTP surface.
//! Both hand updates to the dispatcher through a bounded channel with a
//! single consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::api::{ChatClient, ChatError, Update};

const UPDATE_QUEUE_CAPACITY: usize = 128;
const LONG_POLL_TIMEOUT_SECS: u64 = 10;
const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state for the webhook HTTP handler.
#[derive(Clone)]
pub struct WebhookState {
    tx: mpsc::Sender<Update>,
    secret: String,
    closed: Arc<AtomicBool>,
}

/// Delivers chat updates from either transport.
pub enum UpdateSource {
    LongPolling(LongPollingSource),
    Webhook(WebhookSource),
}

impl UpdateSource {
    pub fn long_polling(chat: Arc<dyn ChatClient>) -> Self {
        Self::LongPolling(LongPollingSource { chat })
    }

    pub fn webhook(chat: Arc<dyn ChatClient>, url: String, secret: String) -> Self {
        let (tx, rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
        Self::Webhook(WebhookSource {
            chat,
            url,
            secret,
            tx,
            rx: Some(rx),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Begin delivering updates; returns the consuming end of the queue.
    pub async fn start(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Update>, ChatError> {
        match self {
            Self::LongPolling(source) => source.start(cancel).await,
            Self::Webhook(source) => source.start().await,
        }
    }

    /// Stop delivering updates.
    pub async fn stop(&self) {
        match self {
            Self::LongPolling(_) => {}
            Self::Webhook(source) => source.stop().await,
        }
    }

    /// Handler state for the webhook route; empty for long polling.
    pub fn webhook_state(&self) -> Option<WebhookState> {
        match self {
            Self::LongPolling(_) => None,
            Self::Webhook(source) => Some(WebhookState {
                tx: source.tx.clone(),
                secret: source.secret.clone(),
                closed: source.closed.clone(),
            }),
        }
    }
}

/// Pull transport: repeated `getUpdates` calls until cancelled.
pub struct LongPollingSource {
    chat: Arc<dyn ChatClient>,
}

impl LongPollingSource {
    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Update>, ChatError> {
        let (tx, rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
        let chat = self.chat.clone();
        tokio::spawn(async move {
            let mut offset: Option<i64> = None;
            loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = chat.get_updates(offset, LONG_POLL_TIMEOUT_SECS) => result,
                };
                let updates = match batch {
                    Ok(updates) => updates,
                    Err(err) => {
                        warn!(error = %err, "long polling request failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => continue,
                        }
                    }
                };
                for update in updates {
                    offset = Some(update.update_id + 1);
                    if tx.send(update).await.is_err() {
                        return;
                    }
                }
            }
        });
        info!("telegram updates started via long polling");
        Ok(rx)
    }
}

/// Push transport: updates arrive on the inbound HTTP surface.
pub struct WebhookSource {
    chat: Arc<dyn ChatClient>,
    url: String,
    secret: String,
    tx: mpsc::Sender<Update>,
    rx: Option<mpsc::Receiver<Update>>,
    closed: Arc<AtomicBool>,
}

impl WebhookSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<Update>, ChatError> {
        self.chat.set_webhook(&self.url, &self.secret).await?;
        info!(url = %self.url, "telegram updates started via webhook");
        self.rx.take().ok_or_else(|| ChatError::Api {
            method: "setWebhook".to_string(),
            description: "webhook source already started".to_string(),
        })
    }

    async fn stop(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Err(err) = self.chat.delete_webhook(true).await {
            warn!(error = %err, "failed to remove webhook");
        }
    }
}

/// Webhook endpoint: authenticates the shared secret and enqueues the
/// decoded update, shedding load when the queue is full.
pub async fn webhook_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if state.closed.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    let secret = headers
        .get(SECRET_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if secret != state.secret {
        warn!("webhook secret mismatch");
        return StatusCode::UNAUTHORIZED;
    }
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            error!(error = %err, "failed to decode webhook update");
            return StatusCode::BAD_REQUEST;
        }
    };
    match state.tx.try_send(update) {
        Ok(()) => StatusCode::OK,
        Err(_) => {
            error!("webhook update dropped: queue full");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::HeaderValue;

    use super::super::api::{
        EditMessageTextParams, FileInfo, SendMessageParams, SentMessage,
    };

    struct StubChat;

    #[async_trait]
    impl ChatClient for StubChat {
        async fn send_message(&self, _: SendMessageParams) -> Result<SentMessage, ChatError> {
            Ok(SentMessage { message_id: 1 })
        }

        async fn edit_message_text(&self, _: EditMessageTextParams) -> Result<(), ChatError> {
            Ok(())
        }

        async fn delete_message(&self, _: i64, _: i64) -> Result<(), ChatError> {
            Ok(())
        }

        async fn answer_callback_query(&self, _: &str, _: &str) -> Result<(), ChatError> {
            Ok(())
        }

        async fn set_webhook(&self, _: &str, _: &str) -> Result<(), ChatError> {
            Ok(())
        }

        async fn delete_webhook(&self, _: bool) -> Result<(), ChatError> {
            Ok(())
        }

        async fn get_updates(&self, _: Option<i64>, _: u64) -> Result<Vec<Update>, ChatError> {
            Ok(Vec::new())
        }

        async fn get_file(&self, _: &str) -> Result<FileInfo, ChatError> {
            Ok(FileInfo { file_path: None })
        }

        async fn download_file(&self, _: &str) -> Result<Vec<u8>, ChatError> {
            Ok(Vec::new())
        }
    }

    fn update_body() -> Bytes {
        Bytes::from(
            serde_json::json!({
                "update_id": 1,
                "message": { "message_id": 2, "chat": { "id": 7 }, "text": "hi" }
            })
            .to_string(),
        )
    }

    fn webhook_state() -> (WebhookState, mpsc::Receiver<Update>) {
        let mut source = UpdateSource::webhook(
            Arc::new(StubChat),
            "https://example.test/webhook".to_string(),
            "s3cret".to_string(),
        );
        let state = source.webhook_state().unwrap();
        let rx = match &mut source {
            UpdateSource::Webhook(webhook) => webhook.rx.take().unwrap(),
            UpdateSource::LongPolling(_) => unreachable!(),
        };
        (state, rx)
    }

    #[tokio::test]
    async fn test_webhook_handler_enqueues_valid_update() {
        let (state, mut rx) = webhook_state();
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_TOKEN_HEADER, HeaderValue::from_static("s3cret"));

        let status = webhook_handler(State(state), headers, update_body()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rx.recv().await.unwrap().update_id, 1);
    }

    #[tokio::test]
    async fn test_webhook_handler_rejects_bad_secret() {
        let (state, mut rx) = webhook_state();
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_TOKEN_HEADER, HeaderValue::from_static("wrong"));

        let status = webhook_handler(State(state), headers, update_body()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_webhook_handler_rejects_missing_secret_header() {
        let (state, _rx) = webhook_state();
        let status = webhook_handler(State(state), HeaderMap::new(), update_body()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_handler_rejects_invalid_json() {
        let (state, _rx) = webhook_state();
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_TOKEN_HEADER, HeaderValue::from_static("s3cret"));

        let status = webhook_handler(State(state), headers, Bytes::from_static(b"not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_handler_sheds_load_when_queue_full() {
        let (state, _rx) = webhook_state();
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_TOKEN_HEADER, HeaderValue::from_static("s3cret"));

        for _ in 0..UPDATE_QUEUE_CAPACITY {
            let status =
                webhook_handler(State(state.clone()), headers.clone(), update_body()).await;
            assert_eq!(status, StatusCode::OK);
        }
        let status = webhook_handler(State(state), headers, update_body()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_webhook_handler_after_stop_returns_unavailable() {
        let mut source = UpdateSource::webhook(
            Arc::new(StubChat),
            "https://example.test/webhook".to_string(),
            "s3cret".to_string(),
        );
        let state = source.webhook_state().unwrap();
        source.stop().await;

        let mut headers = HeaderMap::new();
        headers.insert(SECRET_TOKEN_HEADER, HeaderValue::from_static("s3cret"));
        let status = webhook_handler(State(state), headers, update_body()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
