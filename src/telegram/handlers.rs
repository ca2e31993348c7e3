//! Chat update dispatching.
//!
//! Single consumer of the update channel. Routes inline-button presses and
//! prompt-scoped text/voice answers into registry transitions, and carries
//! every resolution through the shared finalization path: edit the anchor
//! message, then emit the orchestrator callback.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::callback::CallbackEmitter;
use crate::executions::{Execution, ExecutionResult, Registry, Status};
use crate::i18n::{self, Messages};

use super::api::{
    CallbackQuery, ChatClient, EditMessageTextParams, Message, ReplyParameters,
    SendMessageParams, Update, Voice,
};
use super::render::{parse_mode, prompt_keyboard, resolved_keyboard};
use super::voice::normalize_voice_audio;
use super::transcriber::Transcriber;
use super::TIMEOUT_RESULT;

/// Selects one predefined option.
pub const ACTION_OPTION: &str = "option";
/// Starts the custom-answer flow.
pub const ACTION_CUSTOM: &str = "custom";
/// Cancels the custom-answer prompt.
pub const ACTION_CANCEL_CUSTOM: &str = "custom_cancel";
/// Deletes a resolved message.
pub const ACTION_DELETE: &str = "delete";

/// Build callback data for an action.
pub fn callback_data(action: &str, payload: &str) -> String {
    if payload.is_empty() {
        action.to_string()
    } else {
        format!("{action}:{payload}")
    }
}

fn parse_callback(data: &str) -> (&str, &str) {
    match data.split_once(':') {
        Some((action, payload)) => (action, payload),
        None => (data, ""),
    }
}

fn parse_option_payload(payload: &str) -> Option<(&str, i64)> {
    let (correlation_id, index) = payload.split_once('|')?;
    let index = index.parse().ok()?;
    Some((correlation_id, index))
}

enum VoiceFlowError {
    Disabled,
    Failed,
}

/// Processes chat updates and resolves executions.
pub struct UpdateDispatcher {
    chat: Arc<dyn ChatClient>,
    registry: Arc<Registry>,
    catalog: HashMap<String, Messages>,
    default_lang: String,
    chat_id: i64,
    stt_lang: String,
    transcriber: Option<Arc<dyn Transcriber>>,
    emitter: CallbackEmitter,
    timeout_message: String,
}

impl UpdateDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chat: Arc<dyn ChatClient>,
        registry: Arc<Registry>,
        catalog: HashMap<String, Messages>,
        default_lang: String,
        chat_id: i64,
        stt_lang: String,
        transcriber: Option<Arc<dyn Transcriber>>,
        emitter: CallbackEmitter,
        timeout_message: String,
    ) -> Self {
        Self {
            chat,
            registry,
            catalog,
            default_lang,
            chat_id,
            stt_lang,
            transcriber,
            emitter,
            timeout_message,
        }
    }

    /// Drain updates until the channel closes or the token fires.
    pub async fn run(self: Arc<Self>, mut updates: mpsc::Receiver<Update>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                update = updates.recv() => match update {
                    Some(update) => self.handle_update(update).await,
                    None => return,
                },
            }
        }
    }

    pub async fn handle_update(&self, update: Update) {
        if let Some(query) = update.callback_query {
            self.handle_callback(query).await;
            return;
        }
        if let Some(message) = update.message {
            self.handle_message(message).await;
        }
    }

    async fn handle_callback(&self, query: CallbackQuery) {
        let Some(anchor) = &query.message else {
            return;
        };
        if anchor.chat.id != self.chat_id {
            let text = self.messages_for("").invalid_chat;
            self.answer_callback(&query, &text).await;
            return;
        }
        let data = query.data.clone().unwrap_or_default();
        let (action, payload) = parse_callback(&data);
        match action {
            ACTION_OPTION => self.resolve_option(&query, payload).await,
            ACTION_CUSTOM => self.start_custom_prompt(&query, payload).await,
            ACTION_CANCEL_CUSTOM => self.cancel_custom_prompt(&query, payload).await,
            ACTION_DELETE => self.delete_resolved(&query, payload).await,
            _ => {
                let text = self.messages_for("").invalid_action;
                self.answer_callback(&query, &text).await;
            }
        }
    }

    async fn handle_message(&self, message: Message) {
        if message.chat.id != self.chat_id {
            return;
        }
        let Some((exec, _)) = self.registry.current_prompt() else {
            return;
        };
        if let Some(text) = &message.text {
            if !text.is_empty() {
                let answer = text.trim();
                if answer.is_empty() {
                    return;
                }
                self.resolve_custom_answer(&exec, answer, "text").await;
                return;
            }
        }
        if let Some(voice) = &message.voice {
            match self.transcribe_voice(voice).await {
                Err(VoiceFlowError::Disabled) => {
                    let text = self.messages_for(&exec.request.lang).voice_disabled;
                    self.reply(&text).await;
                }
                Err(VoiceFlowError::Failed) => {
                    let text = self.messages_for(&exec.request.lang).transcription_failed;
                    self.reply(&text).await;
                }
                Ok(answer) => {
                    let answer = answer.trim().to_string();
                    if answer.is_empty() {
                        return;
                    }
                    self.resolve_custom_answer(&exec, &answer, "voice").await;
                }
            }
        }
    }

    async fn resolve_custom_answer(&self, exec: &Execution, answer: &str, input_mode: &str) {
        let Some((exec, prompt_id)) = self.registry.resolve(&exec.request.correlation_id) else {
            return;
        };
        if let Some(prompt_id) = prompt_id {
            self.delete_message(prompt_id).await;
        }
        let output = json!({
            "question": exec.request.question,
            "selected_option": answer,
            "selected_index": Value::Null,
            "custom": true,
            "input_mode": input_mode,
        });
        let msg = self.messages_for(&exec.request.lang);
        let note = format!("✅ {}: {}", msg.selected_note, answer);
        self.finalize_execution(
            &exec,
            &ExecutionResult::with_note(Status::Success, output, note),
        )
        .await;
    }

    async fn resolve_option(&self, query: &CallbackQuery, payload: &str) {
        let Some((correlation_id, index)) = parse_option_payload(payload) else {
            let text = self.messages_for("").invalid_action;
            self.answer_callback(query, &text).await;
            return;
        };
        let Some(exec) = self.registry.get(correlation_id) else {
            let text = self.messages_for("").already_resolved;
            self.answer_callback(query, &text).await;
            return;
        };
        if index < 0 || index as usize >= exec.request.options.len() {
            let text = self.messages_for(&exec.request.lang).invalid_action;
            self.answer_callback(query, &text).await;
            return;
        }
        let Some((exec, prompt_id)) = self.registry.resolve(correlation_id) else {
            let text = self.messages_for("").already_resolved;
            self.answer_callback(query, &text).await;
            return;
        };
        if let Some(prompt_id) = prompt_id {
            self.delete_message(prompt_id).await;
        }

        let selected = exec.request.options[index as usize].clone();
        let output = json!({
            "question": exec.request.question,
            "selected_option": selected,
            "selected_index": index,
            "custom": false,
            "input_mode": "button",
        });
        let msg = self.messages_for(&exec.request.lang);
        let note = format!("✅ {}: {}", msg.selected_note, selected);
        self.finalize_execution(
            &exec,
            &ExecutionResult::with_note(Status::Success, output, note.clone()),
        )
        .await;
        self.answer_callback(query, &note).await;
    }

    async fn start_custom_prompt(&self, query: &CallbackQuery, correlation_id: &str) {
        let Some(exec) = self.registry.get(correlation_id) else {
            let text = self.messages_for("").already_resolved;
            self.answer_callback(query, &text).await;
            return;
        };
        if !exec.request.allow_custom {
            let text = self.messages_for(&exec.request.lang).invalid_action;
            self.answer_callback(query, &text).await;
            return;
        }
        let Some(previous_prompt) = self.registry.start_custom_input(correlation_id) else {
            let text = self.messages_for(&exec.request.lang).already_resolved;
            self.answer_callback(query, &text).await;
            return;
        };
        if let Some(previous_prompt) = previous_prompt {
            self.delete_message(previous_prompt).await;
        }
        let msg = self.messages_for(&exec.request.lang);
        let sent = self
            .chat
            .send_message(SendMessageParams {
                chat_id: self.chat_id,
                text: msg.custom_prompt.clone(),
                parse_mode: Some(parse_mode(&exec.request.markup).to_string()),
                reply_markup: Some(prompt_keyboard(&msg, correlation_id)),
                reply_parameters: Some(ReplyParameters {
                    message_id: exec.message_id,
                    allow_sending_without_reply: true,
                }),
            })
            .await;
        match sent {
            Ok(prompt) => {
                self.registry
                    .set_prompt_message(correlation_id, prompt.message_id);
                self.answer_callback(query, "").await;
            }
            Err(err) => {
                error!(error = %err, "failed to send custom prompt");
                self.answer_callback(query, &msg.error_note).await;
            }
        }
    }

    async fn cancel_custom_prompt(&self, query: &CallbackQuery, correlation_id: &str) {
        if let Some(prompt_id) = self.registry.clear_prompt(correlation_id) {
            self.delete_message(prompt_id).await;
        }
        self.answer_callback(query, "").await;
    }

    async fn delete_resolved(&self, query: &CallbackQuery, payload: &str) {
        let message_id: i64 = match payload.parse() {
            Ok(id) if id > 0 => id,
            _ => {
                let text = self.messages_for("").invalid_action;
                self.answer_callback(query, &text).await;
                return;
            }
        };
        self.delete_message(message_id).await;
        self.answer_callback(query, "").await;
    }

    async fn transcribe_voice(&self, voice: &Voice) -> Result<String, VoiceFlowError> {
        let Some(transcriber) = self.transcriber.clone() else {
            return Err(VoiceFlowError::Disabled);
        };
        let file = self.chat.get_file(&voice.file_id).await.map_err(|err| {
            warn!(error = %err, "failed to look up voice file");
            VoiceFlowError::Failed
        })?;
        let file_path = file.file_path.unwrap_or_default();
        let content = self.chat.download_file(&file_path).await.map_err(|err| {
            warn!(error = %err, "failed to download voice file");
            VoiceFlowError::Failed
        })?;
        let normalized = normalize_voice_audio(content, "", &file_path)
            .await
            .map_err(|err| {
                warn!(error = %err, "failed to normalize voice audio");
                VoiceFlowError::Failed
            })?;
        transcriber
            .transcribe(
                normalized.content,
                &normalized.filename,
                &normalized.mime,
                &self.stt_lang,
            )
            .await
            .map_err(|err| {
                warn!(error = %err, "voice transcription failed");
                VoiceFlowError::Failed
            })
    }

    /// Edit the anchor message with the closing note and emit the callback.
    pub async fn finalize_execution(&self, exec: &Execution, result: &ExecutionResult) {
        let msg = self.messages_for(&exec.request.lang);
        let note = note_for_result(&msg, result, &self.timeout_message);
        let text = if note.trim().is_empty() {
            exec.message_text.clone()
        } else {
            format!("{}\n\n{}", exec.message_text, note)
        };
        let edit = self
            .chat
            .edit_message_text(EditMessageTextParams {
                chat_id: self.chat_id,
                message_id: exec.message_id,
                text,
                parse_mode: Some(parse_mode(&exec.request.markup).to_string()),
                reply_markup: Some(resolved_keyboard(&msg, exec.message_id)),
            })
            .await;
        if let Err(err) = edit {
            error!(error = %err, "failed to update telegram message");
        }
        self.emitter.emit(exec, result).await;
    }

    /// Delete a chat message; non-positive ids are a no-op.
    pub async fn delete_message(&self, message_id: i64) {
        if message_id <= 0 {
            return;
        }
        if let Err(err) = self.chat.delete_message(self.chat_id, message_id).await {
            warn!(error = %err, message_id, "failed to delete chat message");
        }
    }

    async fn answer_callback(&self, query: &CallbackQuery, text: &str) {
        if let Err(err) = self.chat.answer_callback_query(&query.id, text).await {
            warn!(error = %err, "failed to answer callback query");
        }
    }

    async fn reply(&self, text: &str) {
        let sent = self
            .chat
            .send_message(SendMessageParams {
                chat_id: self.chat_id,
                text: text.to_string(),
                parse_mode: Some("Markdown".to_string()),
                reply_markup: None,
                reply_parameters: None,
            })
            .await;
        if let Err(err) = sent {
            warn!(error = %err, "failed to send chat reply");
        }
    }

    fn messages_for(&self, lang: &str) -> Messages {
        i18n::messages_for(&self.catalog, lang, &self.default_lang)
    }
}

/// The closing note appended to the anchor message.
pub fn note_for_result(msg: &Messages, result: &ExecutionResult, timeout_message: &str) -> String {
    match result.status {
        Status::Success => {
            if !result.note.trim().is_empty() {
                return result.note.clone();
            }
            if !result.output.is_null() {
                return format!("✅ {}", render_output(&result.output));
            }
            format!("✅ {}", msg.selected_note)
        }
        Status::Error => {
            if let Value::String(value) = &result.output {
                if value.trim() == TIMEOUT_RESULT {
                    if !timeout_message.trim().is_empty() {
                        return timeout_message.to_string();
                    }
                    return format!("⏱️ {}", msg.timeout_note);
                }
                if !value.trim().is_empty() {
                    return format!("⚠️ {}", value);
                }
            }
            if !result.note.trim().is_empty() {
                return result.note.clone();
            }
            format!("⚠️ {}", msg.error_note)
        }
        Status::Pending => String::new(),
    }
}

fn render_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
