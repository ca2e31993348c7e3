//! Voice payload normalization.
//!
//! Audio the speech-to-text provider already accepts passes through
//! untouched; anything else is transcoded to 16 kHz mono mp3 by an ffmpeg
//! subprocess reading stdin and writing stdout.

use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const FFMPEG_SAMPLE_RATE: &str = "16000";
const FFMPEG_CHANNELS: &str = "1";
const FFMPEG_FORMAT: &str = "mp3";

const ACCEPTED_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/mp4",
    "audio/mp4a-latm",
    "audio/x-m4a",
    "audio/m4a",
    "audio/wav",
    "audio/x-wav",
    "audio/webm",
];

const ACCEPTED_EXTENSIONS: &[&str] = &[".mp3", ".mpeg", ".mp4", ".m4a", ".wav", ".webm"];

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("empty audio content")]
    EmptyContent,
    #[error("failed to run ffmpeg: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ffmpeg failed: {status}: {stderr}")]
    Transcode { status: String, stderr: String },
    #[error("empty transcoded audio")]
    EmptyOutput,
}

/// Audio payload ready for the speech-to-text provider.
#[derive(Debug)]
pub struct NormalizedAudio {
    pub content: Vec<u8>,
    pub mime: String,
    pub filename: String,
}

/// Normalize an arbitrary audio payload into an accepted format.
pub async fn normalize_voice_audio(
    content: Vec<u8>,
    mime: &str,
    filename: &str,
) -> Result<NormalizedAudio, VoiceError> {
    if content.is_empty() {
        return Err(VoiceError::EmptyContent);
    }

    if is_accepted_audio(mime, filename) {
        return Ok(NormalizedAudio {
            content,
            mime: mime.to_string(),
            filename: filename.to_string(),
        });
    }

    let mut child = Command::new("ffmpeg")
        .args([
            "-nostdin",
            "-y",
            "-i",
            "pipe:0",
            "-ac",
            FFMPEG_CHANNELS,
            "-ar",
            FFMPEG_SAMPLE_RATE,
            "-f",
            FFMPEG_FORMAT,
            "pipe:1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&content).await?;
        stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(VoiceError::Transcode {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    if output.stdout.is_empty() {
        return Err(VoiceError::EmptyOutput);
    }

    Ok(NormalizedAudio {
        content: output.stdout,
        mime: "audio/mpeg".to_string(),
        filename: normalize_filename(filename),
    })
}

fn is_accepted_audio(mime: &str, filename: &str) -> bool {
    let mime = mime.trim().to_lowercase();
    if !mime.is_empty() && ACCEPTED_MIME_TYPES.contains(&mime.as_str()) {
        return true;
    }
    let name = filename.trim().to_lowercase();
    if name.is_empty() {
        return false;
    }
    ACCEPTED_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

fn normalize_filename(filename: &str) -> String {
    if filename.trim().is_empty() {
        return "voice.mp3".to_string();
    }
    if filename.to_lowercase().ends_with(".mp3") {
        return filename.to_string();
    }
    let base_start = filename.rfind('/').map(|i| i + 1).unwrap_or(0);
    match filename[base_start..].rfind('.') {
        Some(dot) => format!("{}.mp3", &filename[..base_start + dot]),
        None => format!("{filename}.mp3"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accepted_audio_passes_through_unchanged() {
        let content = vec![1u8, 2, 3];
        let out = normalize_voice_audio(content.clone(), "audio/mpeg", "clip.bin")
            .await
            .unwrap();
        assert_eq!(out.content, content);
        assert_eq!(out.mime, "audio/mpeg");
        assert_eq!(out.filename, "clip.bin");
    }

    #[tokio::test]
    async fn test_accepted_extension_passes_through() {
        let out = normalize_voice_audio(vec![1], "", "voice/file_1.M4A")
            .await
            .unwrap();
        assert_eq!(out.filename, "voice/file_1.M4A");
    }

    #[tokio::test]
    async fn test_empty_content_is_rejected() {
        let err = normalize_voice_audio(Vec::new(), "audio/mpeg", "a.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::EmptyContent));
    }

    #[test]
    fn test_is_accepted_audio() {
        assert!(is_accepted_audio("AUDIO/MP3", ""));
        assert!(is_accepted_audio("", "a.webm"));
        assert!(!is_accepted_audio("audio/ogg", "voice.oga"));
        assert!(!is_accepted_audio("", ""));
    }

    #[test]
    fn test_normalize_filename() {
        assert_eq!(normalize_filename(""), "voice.mp3");
        assert_eq!(normalize_filename("clip.oga"), "clip.mp3");
        assert_eq!(normalize_filename("clip.MP3"), "clip.MP3");
        assert_eq!(normalize_filename("clip"), "clip.mp3");
        assert_eq!(normalize_filename("voice/file_5.oga"), "voice/file_5.mp3");
        assert_eq!(normalize_filename(".hidden"), ".mp3");
        assert_eq!(normalize_filename("dir/.conf"), "dir/.mp3");
        assert_eq!(normalize_filename("dir.v1/file"), "dir.v1/file.mp3");
    }
}
