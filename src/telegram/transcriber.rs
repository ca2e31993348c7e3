//! Speech-to-text via the OpenAI transcription API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use thiserror::Error;
use tracing::error;

const TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("empty audio content")]
    EmptyContent,
    #[error("transcription http error: {0}")]
    Http(String),
    #[error("transcription api error: {status}: {body}")]
    Api { status: u16, body: String },
    #[error("empty transcription result")]
    EmptyResult,
}

/// Converts audio to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        content: Vec<u8>,
        filename: &str,
        mime: &str,
        language: &str,
    ) -> Result<String, TranscribeError>;
}

/// OpenAI speech-to-text client.
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self, TranscribeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranscribeError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(
        &self,
        content: Vec<u8>,
        filename: &str,
        mime: &str,
        language: &str,
    ) -> Result<String, TranscribeError> {
        if content.is_empty() {
            return Err(TranscribeError::EmptyContent);
        }
        let filename = if filename.is_empty() {
            "voice.mp3".to_string()
        } else {
            filename.to_string()
        };
        let mime = if mime.is_empty() { "audio/mpeg" } else { mime };

        let file = multipart::Part::bytes(content)
            .file_name(filename)
            .mime_str(mime)
            .map_err(|e| TranscribeError::Http(e.to_string()))?;
        let mut form = multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone());
        if !language.is_empty() {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(TRANSCRIPTIONS_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscribeError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "transcription request rejected");
            return Err(TranscribeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        #[derive(Deserialize)]
        struct Transcription {
            #[serde(default)]
            text: String,
        }

        let transcription: Transcription = response
            .json()
            .await
            .map_err(|e| TranscribeError::Http(e.to_string()))?;
        if transcription.text.is_empty() {
            return Err(TranscribeError::EmptyResult);
        }
        Ok(transcription.text)
    }
}
