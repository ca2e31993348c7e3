//! In-flight execution state and the process-wide registry.
//!
//! The registry is the single place mutable state is coordinated. Every
//! composite transition (prompt swap, resolve-with-prompt) happens under one
//! lock so the update dispatcher and the timeout timers cannot interleave
//! half-applied states.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Execution status reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Execution finished successfully.
    Success,
    /// Execution failed.
    Error,
    /// Execution is queued for async completion.
    Pending,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
            Status::Pending => "pending",
        }
    }
}

/// Async callback settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Callback {
    /// Webhook callback URL.
    pub url: String,
}

/// Tool metadata echoed back on the callback; opaque beyond the name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tool {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Everything required to run one execution.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub correlation_id: String,
    pub tool: Tool,
    pub arguments: Map<String, Value>,
    pub spec: Option<Map<String, Value>>,
    pub question: String,
    pub context: String,
    pub options: Vec<String>,
    pub allow_custom: bool,
    pub custom_label: String,
    pub lang: String,
    pub markup: String,
    pub callback: Callback,
}

/// Outcome of an execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: Status,
    pub output: Value,
    pub note: String,
}

impl ExecutionResult {
    pub fn new(status: Status, output: Value) -> Self {
        Self {
            status,
            output,
            note: String::new(),
        }
    }

    pub fn with_note(status: Status, output: Value, note: String) -> Self {
        Self {
            status,
            output,
            note,
        }
    }
}

/// State of a single in-flight execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub request: Request,
    pub created_at: DateTime<Utc>,
    /// Chat message id of the anchor message, 0 until sent.
    pub message_id: i64,
    /// Verbatim rendered anchor text, kept for the in-place edit.
    pub message_text: String,
    /// Whether this execution currently owns the custom-input prompt.
    pub awaiting_text: bool,
}

/// Returned when a correlation id is already live.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("execution already exists")]
pub struct AlreadyExists;

#[derive(Debug, Default)]
struct RegistryInner {
    executions: HashMap<String, Execution>,
    prompt_correlation: Option<String>,
    prompt_message_id: Option<i64>,
}

/// Store of live executions plus the custom-input prompt singleton.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new execution; rejects duplicate correlation ids.
    pub fn add(&self, request: Request) -> Result<(), AlreadyExists> {
        let mut inner = self.lock();
        if inner.executions.contains_key(&request.correlation_id) {
            return Err(AlreadyExists);
        }
        let correlation_id = request.correlation_id.clone();
        inner.executions.insert(
            correlation_id,
            Execution {
                request,
                created_at: Utc::now(),
                message_id: 0,
                message_text: String::new(),
                awaiting_text: false,
            },
        );
        Ok(())
    }

    /// Snapshot of the execution for a correlation id.
    pub fn get(&self, correlation_id: &str) -> Option<Execution> {
        self.lock().executions.get(correlation_id).cloned()
    }

    /// Store chat message coordinates once the anchor message is sent.
    pub fn attach_message(&self, correlation_id: &str, message_id: i64, message_text: String) {
        let mut inner = self.lock();
        if let Some(exec) = inner.executions.get_mut(correlation_id) {
            exec.message_id = message_id;
            exec.message_text = message_text;
        }
    }

    /// Mark the execution as awaiting custom text, taking over the prompt
    /// singleton. Returns the superseded prompt message id to delete, or
    /// `None` when the execution is gone.
    pub fn start_custom_input(&self, correlation_id: &str) -> Option<Option<i64>> {
        let mut inner = self.lock();
        if !inner.executions.contains_key(correlation_id) {
            return None;
        }
        let mut previous_prompt = None;
        if let Some(owner) = inner.prompt_correlation.clone() {
            if owner != correlation_id {
                if let Some(prev) = inner.executions.get_mut(&owner) {
                    prev.awaiting_text = false;
                }
                previous_prompt = inner.prompt_message_id;
            }
        }
        if let Some(exec) = inner.executions.get_mut(correlation_id) {
            exec.awaiting_text = true;
        }
        inner.prompt_correlation = Some(correlation_id.to_string());
        inner.prompt_message_id = None;
        Some(previous_prompt)
    }

    /// Record the prompt's chat message id; ignored when the execution no
    /// longer owns the singleton.
    pub fn set_prompt_message(&self, correlation_id: &str, message_id: i64) {
        let mut inner = self.lock();
        if inner.prompt_correlation.as_deref() == Some(correlation_id) {
            inner.prompt_message_id = Some(message_id);
        }
    }

    /// Release the prompt singleton if owned by this correlation id.
    /// Returns the prompt message id to delete.
    pub fn clear_prompt(&self, correlation_id: &str) -> Option<i64> {
        let mut inner = self.lock();
        if inner.prompt_correlation.as_deref() != Some(correlation_id) {
            return None;
        }
        if let Some(exec) = inner.executions.get_mut(correlation_id) {
            exec.awaiting_text = false;
        }
        let removed = inner.prompt_message_id.take();
        inner.prompt_correlation = None;
        removed
    }

    /// The execution currently awaiting custom input, with its prompt
    /// message id.
    pub fn current_prompt(&self) -> Option<(Execution, Option<i64>)> {
        let inner = self.lock();
        let owner = inner.prompt_correlation.as_deref()?;
        let exec = inner.executions.get(owner)?;
        if !exec.awaiting_text {
            return None;
        }
        Some((exec.clone(), inner.prompt_message_id))
    }

    /// Remove the execution, clearing the prompt singleton when owned.
    /// This is the single removal point, so each execution resolves at most
    /// once. Returns the prompt message id to delete.
    pub fn resolve(&self, correlation_id: &str) -> Option<(Execution, Option<i64>)> {
        let mut inner = self.lock();
        let exec = inner.executions.remove(correlation_id)?;
        let mut prompt_id = None;
        if inner.prompt_correlation.as_deref() == Some(correlation_id) {
            prompt_id = inner.prompt_message_id.take();
            inner.prompt_correlation = None;
        }
        Some((exec, prompt_id))
    }

    /// Number of live executions.
    pub fn len(&self) -> usize {
        self.lock().executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
