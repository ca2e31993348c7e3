//! The `/execute` endpoint: request validation and submission.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

use crate::executions::{Callback, Request, Status, Tool};
use crate::telegram::SubmitError;

use super::AppState;

const DEFAULT_OPTIONS_MIN: usize = 2;
const DEFAULT_OPTIONS_MAX: usize = 5;

/// Input payload for `POST /execute`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecuteRequest {
    pub correlation_id: String,
    pub tool: Tool,
    pub arguments: Option<Map<String, Value>>,
    pub spec: Option<Map<String, Value>>,
    pub lang: String,
    pub markup: String,
    pub callback: Option<Callback>,
    pub timeout_sec: i64,
}

/// Output payload for `POST /execute`.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub status: Status,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

pub async fn execute_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<ExecuteResponse>) {
    let mut req: ExecuteRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "invalid json payload", None),
    };

    if req.correlation_id.trim().is_empty() {
        return reject(StatusCode::BAD_REQUEST, "correlation_id is required", None);
    }
    if req.tool.name.trim().is_empty() {
        return reject(StatusCode::BAD_REQUEST, "tool.name is required", None);
    }
    let arguments = req.arguments.take().unwrap_or_default();
    if req.markup.trim().is_empty() {
        req.markup = "markdown".to_string();
    }
    match req.markup.trim().to_lowercase().as_str() {
        "markdown" | "html" => {}
        _ => {
            return reject(
                StatusCode::BAD_REQUEST,
                "markup must be markdown or html",
                None,
            )
        }
    }
    let lang = normalize_lang(&req.lang, &state.default_lang);
    let callback = match req.callback.take() {
        Some(callback) if !callback.url.trim().is_empty() => callback,
        _ => {
            return reject(
                StatusCode::BAD_REQUEST,
                "callback.url is required for async execution",
                None,
            )
        }
    };

    let derived = match parse_feedback_args(&arguments, req.spec.as_ref()) {
        Ok(derived) => derived,
        Err(message) => return reject(StatusCode::BAD_REQUEST, &message, None),
    };

    let timeout = if req.timeout_sec > 0 {
        std::time::Duration::from_secs(req.timeout_sec as u64)
    } else {
        state.default_timeout
    };

    let correlation_id = req.correlation_id.clone();
    let request = Request {
        correlation_id: correlation_id.clone(),
        tool: req.tool,
        arguments,
        spec: req.spec,
        question: derived.question,
        context: derived.context,
        options: derived.options,
        allow_custom: derived.allow_custom,
        custom_label: derived.custom_label,
        lang,
        markup: req.markup,
        callback,
    };

    match state.service.submit_execution(request, timeout).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(ExecuteResponse {
                status: Status::Pending,
                result: Value::String("queued".to_string()),
                correlation_id: Some(correlation_id),
            }),
        ),
        Err(SubmitError::AlreadyExists) => reject(
            StatusCode::BAD_REQUEST,
            "execution already exists",
            Some(correlation_id),
        ),
        Err(err @ SubmitError::Send(_)) => {
            error!(error = %err, correlation_id = %correlation_id, "execution request failed");
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to send telegram message",
                Some(correlation_id),
            )
        }
    }
}

fn reject(
    status: StatusCode,
    message: &str,
    correlation_id: Option<String>,
) -> (StatusCode, Json<ExecuteResponse>) {
    (
        status,
        Json(ExecuteResponse {
            status: Status::Error,
            result: Value::String(message.to_string()),
            correlation_id,
        }),
    )
}

#[derive(Debug)]
struct DerivedArgs {
    question: String,
    context: String,
    options: Vec<String>,
    allow_custom: bool,
    custom_label: String,
}

fn parse_feedback_args(
    arguments: &Map<String, Value>,
    spec: Option<&Map<String, Value>>,
) -> Result<DerivedArgs, String> {
    let question = extract_string(Some(arguments), "question")
        .ok_or_else(|| "question is required".to_string())?;
    let question_len = question.chars().count();
    if !(10..=1000).contains(&question_len) {
        return Err("question must be 10-1000 characters".to_string());
    }

    let context = extract_string(Some(arguments), "context").unwrap_or_default();
    if context.chars().count() > 2000 {
        return Err("context must be <= 2000 characters".to_string());
    }

    let (options_min, options_max) = option_limits(spec);
    let options = extract_options(arguments, options_min, options_max)?;

    let mut allow_custom = true;
    if let Some(value) = extract_bool(spec, "allow_custom_option") {
        allow_custom = value;
    }
    if let Some(value) = extract_bool(Some(arguments), "allow_custom") {
        allow_custom = value;
    }

    let custom_label = extract_string(Some(arguments), "custom_label").unwrap_or_default();

    Ok(DerivedArgs {
        question,
        context,
        options,
        allow_custom,
        custom_label,
    })
}

fn option_limits(spec: Option<&Map<String, Value>>) -> (usize, usize) {
    let mut options_min = DEFAULT_OPTIONS_MIN;
    let mut options_max = DEFAULT_OPTIONS_MAX;
    if let Some(value) = extract_int(spec, "options_min") {
        if value > 0 {
            options_min = value as usize;
        }
    }
    if let Some(value) = extract_int(spec, "options_max") {
        if value >= options_min as i64 {
            options_max = value as usize;
        }
    }
    (options_min, options_max)
}

fn extract_options(
    arguments: &Map<String, Value>,
    options_min: usize,
    options_max: usize,
) -> Result<Vec<String>, String> {
    let raw = match arguments.get("options") {
        Some(Value::Null) | None => return Err("options is required".to_string()),
        Some(raw) => raw,
    };
    let items = raw
        .as_array()
        .ok_or_else(|| "options must be array".to_string())?;
    if items.len() < options_min || items.len() > options_max {
        return Err(format!(
            "options count must be {options_min}-{options_max}"
        ));
    }
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let value = item
            .as_str()
            .ok_or_else(|| format!("options[{idx}] must be string"))?
            .trim();
        if value.is_empty() {
            return Err(format!("options[{idx}] is empty"));
        }
        if value.chars().count() > 300 {
            return Err(format!("options[{idx}] must be <= 300 characters"));
        }
        out.push(value.to_string());
    }
    Ok(out)
}

fn extract_string(data: Option<&Map<String, Value>>, key: &str) -> Option<String> {
    let value = data?.get(key)?.as_str()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn extract_bool(data: Option<&Map<String, Value>>, key: &str) -> Option<bool> {
    data?.get(key)?.as_bool()
}

fn extract_int(data: Option<&Map<String, Value>>, key: &str) -> Option<i64> {
    let raw = data?.get(key)?;
    raw.as_i64().or_else(|| raw.as_f64().map(|f| f as i64))
}

fn normalize_lang(value: &str, fallback: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        lang @ ("ru" | "en") => return lang.to_string(),
        _ => {}
    }
    match fallback.trim().to_lowercase().as_str() {
        lang @ ("ru" | "en") => lang.to_string(),
        _ => "en".to_string(),
    }
}
