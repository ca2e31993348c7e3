//! Runtime configuration loaded from `TG_EXECUTOR_*` environment variables.

use std::env;
use std::time::Duration;

use thiserror::Error;

const ENV_SERVICE_NAME: &str = "TG_EXECUTOR_SERVICE_NAME";
const ENV_HTTP_HOST: &str = "TG_EXECUTOR_HTTP_HOST";
const ENV_HTTP_PORT: &str = "TG_EXECUTOR_HTTP_PORT";
const ENV_LOG_LEVEL: &str = "TG_EXECUTOR_LOG_LEVEL";
const ENV_LANG: &str = "TG_EXECUTOR_LANG";
const ENV_TOKEN: &str = "TG_EXECUTOR_TOKEN";
const ENV_CHAT_ID: &str = "TG_EXECUTOR_CHAT_ID";
const ENV_EXECUTION_TIMEOUT: &str = "TG_EXECUTOR_EXECUTION_TIMEOUT";
const ENV_TIMEOUT_MESSAGE: &str = "TG_EXECUTOR_TIMEOUT_MESSAGE";
const ENV_WEBHOOK_URL: &str = "TG_EXECUTOR_WEBHOOK_URL";
const ENV_WEBHOOK_SECRET: &str = "TG_EXECUTOR_WEBHOOK_SECRET";
const ENV_OPENAI_API_KEY: &str = "TG_EXECUTOR_OPENAI_API_KEY";
const ENV_STT_MODEL: &str = "TG_EXECUTOR_STT_MODEL";
const ENV_STT_TIMEOUT: &str = "TG_EXECUTOR_STT_TIMEOUT";
const ENV_SHUTDOWN_TIMEOUT: &str = "TG_EXECUTOR_SHUTDOWN_TIMEOUT";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime configuration for the executor process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Human-friendly service name for logs.
    pub service_name: String,
    /// HTTP listen host.
    pub http_host: String,
    /// HTTP listen port.
    pub http_port: u16,
    /// Log verbosity (debug, info, warn, error).
    pub log_level: String,
    /// Default i18n language (en or ru).
    pub lang: String,
    /// Telegram bot token.
    pub token: String,
    /// The single authorized Telegram chat id.
    pub chat_id: i64,
    /// Maximum time to wait for an operator answer.
    pub execution_timeout: Duration,
    /// Overrides the note appended to the chat message on timeout.
    pub timeout_message: String,
    /// Webhook public URL; enables webhook mode together with the secret.
    pub webhook_url: String,
    /// Webhook secret token.
    pub webhook_secret: String,
    /// OpenAI API key; enables voice transcription when set.
    pub openai_api_key: String,
    /// Speech-to-text model.
    pub stt_model: String,
    /// Speech-to-text request timeout.
    pub stt_timeout: Duration,
    /// Graceful shutdown drain timeout.
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self {
            service_name: var_or(ENV_SERVICE_NAME, "telegram-executor"),
            http_host: var_or(ENV_HTTP_HOST, ""),
            http_port: parse_var(ENV_HTTP_PORT, 8080)?,
            log_level: var_or(ENV_LOG_LEVEL, "info"),
            lang: normalize_lang(&var_or(ENV_LANG, "en")),
            token: var_or(ENV_TOKEN, ""),
            chat_id: parse_var(ENV_CHAT_ID, 0)?,
            execution_timeout: duration_var(ENV_EXECUTION_TIMEOUT, Duration::from_secs(3600))?,
            timeout_message: var_or(ENV_TIMEOUT_MESSAGE, ""),
            webhook_url: var_or(ENV_WEBHOOK_URL, ""),
            webhook_secret: var_or(ENV_WEBHOOK_SECRET, ""),
            openai_api_key: var_or(ENV_OPENAI_API_KEY, ""),
            stt_model: var_or(ENV_STT_MODEL, "gpt-4o-mini-transcribe"),
            stt_timeout: duration_var(ENV_STT_TIMEOUT, Duration::from_secs(30))?,
            shutdown_timeout: duration_var(ENV_SHUTDOWN_TIMEOUT, Duration::from_secs(10))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_TOKEN));
        }
        if !env::var(ENV_CHAT_ID).map(|v| !v.trim().is_empty()).unwrap_or(false) {
            return Err(ConfigError::Missing(ENV_CHAT_ID));
        }
        if self.http_host.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_HTTP_HOST));
        }
        if self.http_port < 1 {
            return Err(ConfigError::Invalid {
                name: ENV_HTTP_PORT,
                reason: "port must be between 1 and 65535".to_string(),
            });
        }
        if self.execution_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: ENV_EXECUTION_TIMEOUT,
                reason: "execution timeout must be positive".to_string(),
            });
        }
        if self.webhook_url.is_empty() != self.webhook_secret.is_empty() {
            return Err(ConfigError::Invalid {
                name: ENV_WEBHOOK_URL,
                reason: "webhook url and secret must be set together".to_string(),
            });
        }
        Ok(())
    }

    /// Listen address for the HTTP server.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host.trim(), self.http_port)
    }

    /// Whether webhook mode is configured.
    pub fn webhook_enabled(&self) -> bool {
        !self.webhook_url.is_empty() && !self.webhook_secret.is_empty()
    }

    /// Whether voice transcription is configured.
    pub fn voice_enabled(&self) -> bool {
        !self.openai_api_key.is_empty()
    }
}

fn var_or(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                name,
                reason: format!("cannot parse '{}'", value.trim()),
            })
        }
        _ => Ok(default),
    }
}

fn duration_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            parse_duration(value.trim()).ok_or_else(|| ConfigError::Invalid {
                name,
                reason: format!("cannot parse duration '{}'", value.trim()),
            })
        }
        _ => Ok(default),
    }
}

/// Parse `1h`, `90m`, `30s`, `500ms`, `1h30m` or a bare number of seconds.
fn parse_duration(raw: &str) -> Option<Duration> {
    if raw.is_empty() {
        return None;
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse().ok().map(Duration::from_secs);
    }
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match c {
            'h' => Duration::from_secs(value * 3600),
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                Duration::from_millis(value)
            }
            'm' => Duration::from_secs(value * 60),
            's' => Duration::from_secs(value),
            _ => return None,
        };
        total += unit;
    }
    if !digits.is_empty() {
        return None;
    }
    Some(total)
}

fn normalize_lang(value: &str) -> String {
    let lang = value.trim().to_lowercase();
    if lang.is_empty() {
        "en".to_string()
    } else {
        lang
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("90m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("10s5"), None);
    }

    #[test]
    fn test_normalize_lang() {
        assert_eq!(normalize_lang(" RU "), "ru");
        assert_eq!(normalize_lang(""), "en");
    }
}
