//! Inbound HTTP surface: the execute endpoint, the optional chat webhook
//! route, and liveness/readiness probes.

pub mod execute;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::telegram::updates::{webhook_handler, WebhookState};
use crate::telegram::Service;

/// Shared state of the execute and probe handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    pub ready: Arc<AtomicBool>,
    pub default_timeout: Duration,
    pub default_lang: String,
}

/// Build the router; the webhook route is wired only when the webhook
/// update source is active.
pub fn router(state: AppState, webhook: Option<WebhookState>) -> Router {
    let mut app = Router::new()
        .route("/execute", post(execute::execute_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state);
    if let Some(webhook) = webhook {
        app = app.merge(
            Router::new()
                .route("/webhook", post(webhook_handler))
                .with_state(webhook),
        );
    }
    app
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Serve until the shutdown token fires, then drain in-flight handlers.
pub async fn serve(addr: String, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("bind server listener failed")?;
    info!(addr = %addr, "http server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("server terminated with error")
}

#[cfg(test)]
mod tests {
    use super::execute::execute_handler;
    use super::*;
    use crate::config::Config;
    use crate::executions::Registry;
    use crate::i18n;
    use crate::telegram::testing::{ChatCall, RecordingChat};
    use axum::body::Bytes;
    use serde_json::{json, Value};

    fn config() -> Config {
        Config {
            service_name: "telegram-executor".to_string(),
            http_host: "127.0.0.1".to_string(),
            http_port: 8080,
            log_level: "info".to_string(),
            lang: "en".to_string(),
            token: "test-token".to_string(),
            chat_id: 42,
            execution_timeout: Duration::from_secs(3600),
            timeout_message: String::new(),
            webhook_url: String::new(),
            webhook_secret: String::new(),
            openai_api_key: String::new(),
            stt_model: "gpt-4o-mini-transcribe".to_string(),
            stt_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    fn state(chat: Arc<RecordingChat>) -> (AppState, Arc<Registry>) {
        let registry = Arc::new(Registry::new());
        let service = Service::with_chat_client(
            chat,
            &config(),
            i18n::catalog().unwrap(),
            registry.clone(),
        )
        .unwrap();
        (
            AppState {
                service: Arc::new(service),
                ready: Arc::new(AtomicBool::new(false)),
                default_timeout: Duration::from_secs(3600),
                default_lang: "en".to_string(),
            },
            registry,
        )
    }

    fn execute_body() -> Value {
        json!({
            "correlation_id": "r1",
            "tool": { "name": "t" },
            "arguments": { "question": "Question??", "options": ["A", "B"] },
            "callback": { "url": "http://cb" }
        })
    }

    async fn call_execute(
        state: &AppState,
        body: Value,
    ) -> (StatusCode, Value) {
        let (status, response) = execute_handler(
            State(state.clone()),
            Bytes::from(body.to_string()),
        )
        .await;
        (status, serde_json::to_value(&response.0).unwrap())
    }

    #[tokio::test]
    async fn test_execute_accepts_valid_submission() {
        let chat = Arc::new(RecordingChat::new());
        let (state, registry) = state(chat.clone());

        let (status, response) = call_execute(&state, execute_body()).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(
            response,
            json!({ "status": "pending", "result": "queued", "correlation_id": "r1" })
        );
        assert!(registry.get("r1").is_some());
        // Two options and the default custom row reach the chat.
        let sent = chat
            .calls()
            .iter()
            .find_map(|c| match c {
                ChatCall::SendMessage(params) => Some(params.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(sent.reply_markup.unwrap().inline_keyboard.len(), 3);
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_json() {
        let chat = Arc::new(RecordingChat::new());
        let (state, _) = state(chat);
        let (status, response) = execute_handler(
            State(state),
            Bytes::from_static(b"{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            serde_json::to_value(&response.0).unwrap(),
            json!({ "status": "error", "result": "invalid json payload" })
        );
    }

    #[tokio::test]
    async fn test_execute_validation_failures() {
        let chat = Arc::new(RecordingChat::new());
        let (state, registry) = state(chat);

        let mut body = execute_body();
        body["correlation_id"] = json!("  ");
        let (status, response) = call_execute(&state, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["result"], json!("correlation_id is required"));

        let mut body = execute_body();
        body["tool"] = json!({});
        let (_, response) = call_execute(&state, body).await;
        assert_eq!(response["result"], json!("tool.name is required"));

        let mut body = execute_body();
        body["markup"] = json!("bbcode");
        let (_, response) = call_execute(&state, body).await;
        assert_eq!(response["result"], json!("markup must be markdown or html"));

        let mut body = execute_body();
        body["callback"] = json!({ "url": "  " });
        let (_, response) = call_execute(&state, body).await;
        assert_eq!(
            response["result"],
            json!("callback.url is required for async execution")
        );

        let mut body = execute_body();
        body["arguments"]["question"] = json!("short");
        let (_, response) = call_execute(&state, body).await;
        assert_eq!(
            response["result"],
            json!("question must be 10-1000 characters")
        );

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_execute_rejects_duplicate_correlation_id() {
        let chat = Arc::new(RecordingChat::new());
        let (state, _) = state(chat);

        let (status, _) = call_execute(&state, execute_body()).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, response) = call_execute(&state, execute_body()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["status"], json!("error"));
        assert_eq!(response["result"], json!("execution already exists"));
    }

    #[tokio::test]
    async fn test_execute_send_failure_returns_internal_error() {
        let chat = Arc::new(RecordingChat::new());
        let (state, registry) = state(chat.clone());
        chat.fail_next_send();

        let (status, response) = call_execute(&state, execute_body()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["result"], json!("failed to send telegram message"));
        // The registry entry lingers until its timer fires.
        assert!(registry.get("r1").is_some());
    }

    #[tokio::test]
    async fn test_execute_html_markup_and_lang_fallback() {
        let chat = Arc::new(RecordingChat::new());
        let (state, registry) = state(chat);

        let mut body = execute_body();
        body["markup"] = json!("HTML");
        body["lang"] = json!("de");
        let (status, _) = call_execute(&state, body).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let exec = registry.get("r1").unwrap();
        assert_eq!(exec.request.markup, "HTML");
        assert_eq!(exec.request.lang, "en");
        assert!(exec.message_text.starts_with("<b>"));
    }

    #[tokio::test]
    async fn test_readyz_follows_ready_flag() {
        let chat = Arc::new(RecordingChat::new());
        let (state, _) = state(chat);

        let (status, body) = readyz(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "not ready");

        state.ready.store(true, Ordering::SeqCst);
        let (status, body) = readyz(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_healthz_always_ok() {
        assert_eq!(healthz().await, "ok");
    }
}
