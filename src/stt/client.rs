//! `Transcriber` trait and the HTTP implementation.
//!
//! [`HttpTranscriber`] uploads a canonical WAV to a speech-to-text backend as
//! a multipart form and reads the transcript from the JSON reply. The
//! endpoint and timeout come from [`TranscribeConfig`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::audio::WavBytes;
use crate::config::TranscribeConfig;

/// Multipart field the backend reads the recording from.
pub const AUDIO_FIELD: &str = "audio";

// ---------------------------------------------------------------------------
// TranscribeError
// ---------------------------------------------------------------------------

/// Errors that can occur while requesting a transcript.
#[derive(Debug, Error)]
pub enum TranscribeError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("transcription request timed out")]
    Timeout,

    /// The backend answered with a non-success status.
    #[error("transcription service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the expected JSON.
    #[error("failed to parse transcription response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for TranscribeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TranscribeError::Timeout
        } else {
            TranscribeError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Transcriber trait
// ---------------------------------------------------------------------------

/// Async interface to a speech-to-text service.
///
/// Implementors must be `Send + Sync` so they can be shared behind
/// `Arc<dyn Transcriber>`.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: &WavBytes) -> Result<String, TranscribeError>;
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    #[serde(alias = "text")]
    transcript: String,
}

/// Extract the transcript from a backend JSON body.
///
/// Accepts `{"transcript": "..."}` as well as `{"text": "..."}`.
pub fn parse_transcript(body: &str) -> Result<String, TranscribeError> {
    let parsed: TranscriptResponse =
        serde_json::from_str(body).map_err(|e| TranscribeError::Parse(e.to_string()))?;
    Ok(parsed.transcript.trim().to_string())
}

// ---------------------------------------------------------------------------
// HttpTranscriber
// ---------------------------------------------------------------------------

/// Posts recordings to `transcribe.endpoint`.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriber {
    /// Build from config. The client carries the per-request timeout.
    pub fn from_config(config: &TranscribeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: config.endpoint.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: &WavBytes) -> Result<String, TranscribeError> {
        let part = reqwest::multipart::Part::bytes(wav.as_bytes().to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new().part(AUDIO_FIELD, part);

        log::debug!(
            "stt: posting {} bytes ({:.2} s) to {}",
            wav.len(),
            wav.duration_secs(),
            self.endpoint
        );

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TranscribeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_transcript(&body)
    }
}

// ---------------------------------------------------------------------------
// MockTranscriber (test only)
// ---------------------------------------------------------------------------

/// Returns a fixed transcript or a fixed error. Like the backend, it
/// answers 400 to anything but 16 kHz mono 16-bit WAV.
#[cfg(test)]
pub struct MockTranscriber {
    reply: Option<String>,
}

#[cfg(test)]
impl MockTranscriber {
    pub fn ok(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { reply: None }
    }
}

#[cfg(test)]
#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, wav: &WavBytes) -> Result<String, TranscribeError> {
        let canonical = crate::audio::WavHeader::parse(wav.as_bytes()).is_some_and(|h| {
            h.sample_rate == 16_000 && h.channels == 1 && h.bits_per_sample == 16
        });
        if !canonical {
            return Err(TranscribeError::Status {
                status: 400,
                body: "expected 16 kHz mono 16-bit WAV".into(),
            });
        }
        self.reply.clone().ok_or(TranscribeError::Timeout)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
