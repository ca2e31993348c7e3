//! Telegram-side service: anchor message submission, update dispatching and
//! per-execution timeout timers.

pub mod api;
pub mod handlers;
pub mod markup;
pub mod render;
pub mod transcriber;
pub mod updates;
pub mod voice;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::callback::CallbackEmitter;
use crate::config::Config;
use crate::executions::{ExecutionResult, Registry, Request, Status};
use crate::i18n::Messages;

use api::{BotApi, ChatClient, ChatError, SendMessageParams};
use handlers::UpdateDispatcher;
use transcriber::{OpenAiTranscriber, TranscribeError, Transcriber};
use updates::{UpdateSource, WebhookState};

/// Result payload reported when an execution expires unanswered.
pub(crate) const TIMEOUT_RESULT: &str = "execution timeout";

const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("failed to build transcriber: {0}")]
    Transcriber(#[from] TranscribeError),
}

/// Submission failures surfaced to the HTTP layer.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("execution already exists")]
    AlreadyExists,
    #[error("failed to send telegram message")]
    Send(#[source] ChatError),
}

/// Owns the chat client, the update source and the dispatcher.
pub struct Service {
    chat: Arc<dyn ChatClient>,
    registry: Arc<Registry>,
    dispatcher: Arc<UpdateDispatcher>,
    source: Mutex<UpdateSource>,
    webhook: Option<WebhookState>,
    catalog: HashMap<String, Messages>,
    default_lang: String,
    chat_id: i64,
    cancel: CancellationToken,
}

impl Service {
    pub fn new(
        cfg: &Config,
        catalog: HashMap<String, Messages>,
        registry: Arc<Registry>,
    ) -> Result<Self, ServiceError> {
        let chat: Arc<dyn ChatClient> = Arc::new(BotApi::new(&cfg.token)?);
        Self::with_chat_client(chat, cfg, catalog, registry)
    }

    /// Assemble the service around an explicit chat client.
    pub fn with_chat_client(
        chat: Arc<dyn ChatClient>,
        cfg: &Config,
        catalog: HashMap<String, Messages>,
        registry: Arc<Registry>,
    ) -> Result<Self, ServiceError> {
        let transcriber: Option<Arc<dyn Transcriber>> = if cfg.voice_enabled() {
            Some(Arc::new(OpenAiTranscriber::new(
                &cfg.openai_api_key,
                &cfg.stt_model,
                cfg.stt_timeout,
            )?))
        } else {
            None
        };

        let stt_lang = if cfg.lang.is_empty() {
            "en".to_string()
        } else {
            cfg.lang.clone()
        };

        let dispatcher = Arc::new(UpdateDispatcher::new(
            chat.clone(),
            registry.clone(),
            catalog.clone(),
            cfg.lang.clone(),
            cfg.chat_id,
            stt_lang,
            transcriber,
            CallbackEmitter::new(reqwest::Client::new()),
            cfg.timeout_message.clone(),
        ));

        let source = if cfg.webhook_enabled() {
            UpdateSource::webhook(
                chat.clone(),
                cfg.webhook_url.clone(),
                cfg.webhook_secret.clone(),
            )
        } else {
            UpdateSource::long_polling(chat.clone())
        };
        let webhook = source.webhook_state();

        Ok(Self {
            chat,
            registry,
            dispatcher,
            source: Mutex::new(source),
            webhook,
            catalog,
            default_lang: cfg.lang.clone(),
            chat_id: cfg.chat_id,
            cancel: CancellationToken::new(),
        })
    }

    /// Begin receiving chat updates and dispatching them.
    pub async fn start(&self) -> Result<(), ChatError> {
        let updates = {
            let mut source = self.source.lock().await;
            source.start(self.cancel.child_token()).await?
        };
        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            dispatcher.run(updates, cancel).await;
        });
        Ok(())
    }

    /// Stop update processing and cancel background work.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.source.lock().await.stop().await;
    }

    /// Handler state for the webhook route when webhook mode is configured.
    pub fn webhook_state(&self) -> Option<WebhookState> {
        self.webhook.clone()
    }

    /// Send the anchor message and arm the per-execution deadline.
    /// Returns as soon as the execution is queued; the answer arrives later
    /// through the update dispatcher.
    pub async fn submit_execution(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<(), SubmitError> {
        let timeout = if timeout.is_zero() {
            DEFAULT_EXECUTION_TIMEOUT
        } else {
            timeout
        };
        if self.registry.add(request.clone()).is_err() {
            return Err(SubmitError::AlreadyExists);
        }

        let msg = crate::i18n::messages_for(&self.catalog, &request.lang, &self.default_lang);
        let message_text = render::render_message(&msg, &request);
        let keyboard = render::options_keyboard(&msg, &request);

        let sent = self
            .chat
            .send_message(SendMessageParams {
                chat_id: self.chat_id,
                text: message_text.clone(),
                parse_mode: Some(render::parse_mode(&request.markup).to_string()),
                reply_markup: Some(keyboard),
                reply_parameters: None,
            })
            .await
            .map_err(|err| {
                error!(error = %err, "failed to send telegram message");
                SubmitError::Send(err)
            })?;

        self.registry
            .attach_message(&request.correlation_id, sent.message_id, message_text);
        self.schedule_timeout(request.correlation_id.clone(), timeout);
        Ok(())
    }

    fn schedule_timeout(&self, correlation_id: String, timeout: Duration) {
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(timeout) => {}
            }
            // An already-resolved execution makes the timer a no-op.
            let Some((exec, prompt_id)) = registry.resolve(&correlation_id) else {
                return;
            };
            if let Some(prompt_id) = prompt_id {
                dispatcher.delete_message(prompt_id).await;
            }
            dispatcher
                .finalize_execution(
                    &exec,
                    &ExecutionResult::new(
                        Status::Error,
                        serde_json::Value::String(TIMEOUT_RESULT.to_string()),
                    ),
                )
                .await;
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory chat client and transcriber fakes shared by the module
    //! tests.

    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::api::{
        ChatClient, ChatError, EditMessageTextParams, FileInfo, SendMessageParams, SentMessage,
        Update,
    };
    use super::transcriber::{TranscribeError, Transcriber};

    #[derive(Debug, Clone)]
    pub enum ChatCall {
        SendMessage(SendMessageParams),
        EditMessage(EditMessageTextParams),
        DeleteMessage { chat_id: i64, message_id: i64 },
        AnswerCallback { id: String, text: String },
        SetWebhook { url: String },
        DeleteWebhook,
        GetFile { file_id: String },
        DownloadFile { file_path: String },
    }

    /// Records every chat call; message ids count up from 100.
    pub struct RecordingChat {
        calls: Mutex<Vec<ChatCall>>,
        next_message_id: AtomicI64,
        fail_next_send: AtomicBool,
    }

    impl RecordingChat {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                next_message_id: AtomicI64::new(100),
                fail_next_send: AtomicBool::new(false),
            }
        }

        pub fn calls(&self) -> Vec<ChatCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear_calls(&self) {
            self.calls.lock().unwrap().clear();
        }

        pub fn fail_next_send(&self) {
            self.fail_next_send.store(true, Ordering::SeqCst);
        }

        fn record(&self, call: ChatCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ChatClient for RecordingChat {
        async fn send_message(
            &self,
            params: SendMessageParams,
        ) -> Result<SentMessage, ChatError> {
            if self.fail_next_send.swap(false, Ordering::SeqCst) {
                return Err(ChatError::Api {
                    method: "sendMessage".to_string(),
                    description: "forced failure".to_string(),
                });
            }
            self.record(ChatCall::SendMessage(params));
            Ok(SentMessage {
                message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            })
        }

        async fn edit_message_text(
            &self,
            params: EditMessageTextParams,
        ) -> Result<(), ChatError> {
            self.record(ChatCall::EditMessage(params));
            Ok(())
        }

        async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
            self.record(ChatCall::DeleteMessage {
                chat_id,
                message_id,
            });
            Ok(())
        }

        async fn answer_callback_query(
            &self,
            callback_query_id: &str,
            text: &str,
        ) -> Result<(), ChatError> {
            self.record(ChatCall::AnswerCallback {
                id: callback_query_id.to_string(),
                text: text.to_string(),
            });
            Ok(())
        }

        async fn set_webhook(&self, url: &str, _secret_token: &str) -> Result<(), ChatError> {
            self.record(ChatCall::SetWebhook {
                url: url.to_string(),
            });
            Ok(())
        }

        async fn delete_webhook(&self, _drop_pending_updates: bool) -> Result<(), ChatError> {
            self.record(ChatCall::DeleteWebhook);
            Ok(())
        }

        async fn get_updates(
            &self,
            _offset: Option<i64>,
            _timeout_secs: u64,
        ) -> Result<Vec<Update>, ChatError> {
            Ok(Vec::new())
        }

        async fn get_file(&self, file_id: &str) -> Result<FileInfo, ChatError> {
            self.record(ChatCall::GetFile {
                file_id: file_id.to_string(),
            });
            Ok(FileInfo {
                file_path: Some(format!("voice/{file_id}.mp3")),
            })
        }

        async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, ChatError> {
            self.record(ChatCall::DownloadFile {
                file_path: file_path.to_string(),
            });
            Ok(vec![1, 2, 3])
        }
    }

    /// Returns a fixed transcript for any audio.
    pub struct FixedTranscriber(pub String);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(
            &self,
            _content: Vec<u8>,
            _filename: &str,
            _mime: &str,
            _language: &str,
        ) -> Result<String, TranscribeError> {
            Ok(self.0.clone())
        }
    }
}
